//! Session enumeration
//!
//! Active sessions are listed by `nginx_stage nginx_list`, one user name per
//! line. Each name is resolved to a uid so the process-based collectors can
//! attribute processes to sessions.

use crate::command::CommandError;
use crate::core::{CommandRunner, IdentityResolver, Session, SessionSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const LIST_SUBCOMMAND: &str = "nginx_list";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("owner lookup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Resolves account names through the system user database (NSS).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentityResolver;

impl IdentityResolver for SystemIdentityResolver {
    fn uid_for(&self, name: &str) -> Option<u32> {
        uzers::get_user_by_name(name).map(|user| user.uid())
    }
}

/// Lists active sessions and resolves their owners.
pub struct SessionEnumerator {
    runner: Arc<dyn CommandRunner>,
    identities: Arc<dyn IdentityResolver>,
    nginx_stage_path: PathBuf,
}

impl SessionEnumerator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        identities: Arc<dyn IdentityResolver>,
        nginx_stage_path: PathBuf,
    ) -> Self {
        Self {
            runner,
            identities,
            nginx_stage_path,
        }
    }

    /// Runs the listing command and builds the session set.
    ///
    /// Names that do not resolve to an account stay in the set (they still
    /// count as active sessions) but contribute no owner uid.
    pub async fn enumerate(&self) -> Result<SessionSet, SessionError> {
        let program = self.nginx_stage_path.to_string_lossy();
        let output = self.runner.run(&program, &[LIST_SUBCOMMAND]).await?;
        if !output.success {
            return Err(CommandError::failed(&program, &output).into());
        }

        // NSS lookups may block on a directory service.
        let names = parse_session_list(&output.stdout_lossy());
        let identities = Arc::clone(&self.identities);
        let sessions: Vec<Session> = tokio::task::spawn_blocking(move || {
            names
                .into_iter()
                .map(|name| {
                    let uid = identities.uid_for(&name);
                    if uid.is_none() {
                        warn!(pun = %name, "Unable to lookup PUN username");
                    }
                    Session { name, uid }
                })
                .collect::<Vec<_>>()
        })
        .await?;

        let set = SessionSet::new(sessions);
        debug!(puns = ?set.names(), "Found PUNs");
        Ok(set)
    }
}

/// Splits listing output into session names, dropping blank lines.
pub fn parse_session_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CommandOutput;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedRunner {
        output: CommandOutput,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push((
                program.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
            ));
            Ok(self.output.clone())
        }
    }

    struct Users(HashMap<&'static str, u32>);

    impl IdentityResolver for Users {
        fn uid_for(&self, name: &str) -> Option<u32> {
            self.0.get(name).copied()
        }
    }

    fn enumerator(output: CommandOutput) -> (SessionEnumerator, Arc<FixedRunner>) {
        let runner = Arc::new(FixedRunner {
            output,
            calls: Mutex::new(Vec::new()),
        });
        let users = Users(HashMap::from([("foo", 32666), ("bar", 20821)]));
        let enumerator = SessionEnumerator::new(
            runner.clone(),
            Arc::new(users),
            PathBuf::from("/opt/ood/nginx_stage/sbin/nginx_stage"),
        );
        (enumerator, runner)
    }

    #[test]
    fn test_parse_session_list_skips_blank_lines() {
        assert_eq!(parse_session_list("\nfoo\nbar\n\n"), vec!["foo", "bar"]);
        assert!(parse_session_list("").is_empty());
    }

    #[tokio::test]
    async fn test_enumerate_resolves_owners_in_listing_order() {
        let (enumerator, runner) = enumerator(CommandOutput {
            success: true,
            code: Some(0),
            stdout: b"\nfoo\nbar\nghost\n".to_vec(),
            stderr: Vec::new(),
        });

        let set = enumerator.enumerate().await.unwrap();

        assert_eq!(set.names(), vec!["foo", "bar", "ghost"]);
        assert!(set.owns(32666));
        assert!(set.owns(20821));
        assert_eq!(set.iter().last().unwrap().uid, None);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "/opt/ood/nginx_stage/sbin/nginx_stage");
        assert_eq!(calls[0].1, vec!["nginx_list"]);
    }

    #[tokio::test]
    async fn test_enumerate_fails_on_non_zero_exit() {
        let (enumerator, _) = enumerator(CommandOutput {
            success: false,
            code: Some(1),
            stdout: Vec::new(),
            stderr: b"sudo: a password is required".to_vec(),
        });

        let err = enumerator.enumerate().await.unwrap_err();
        assert!(err.to_string().contains("a password is required"));
    }

    struct RecordingUsers(Mutex<Vec<std::thread::ThreadId>>);

    impl IdentityResolver for RecordingUsers {
        fn uid_for(&self, _name: &str) -> Option<u32> {
            self.0.lock().unwrap().push(std::thread::current().id());
            Some(1001)
        }
    }

    #[tokio::test]
    async fn test_owner_lookups_run_off_the_runtime_thread() {
        let runner = Arc::new(FixedRunner {
            output: CommandOutput {
                success: true,
                code: Some(0),
                stdout: b"foo\nbar\n".to_vec(),
                stderr: Vec::new(),
            },
            calls: Mutex::new(Vec::new()),
        });
        let users = Arc::new(RecordingUsers(Mutex::new(Vec::new())));
        let enumerator = SessionEnumerator::new(runner, users.clone(), PathBuf::from("nginx_stage"));

        let set = enumerator.enumerate().await.unwrap();

        assert_eq!(set.len(), 2);
        let threads = users.0.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != std::thread::current().id()));
    }
}
