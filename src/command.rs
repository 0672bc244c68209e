//! External command execution.

use crate::core::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl CommandError {
    /// Builds a `Failed` error from a captured output.
    pub fn failed(program: &str, output: &CommandOutput) -> Self {
        let status = match output.code {
            Some(code) => format!("exit status {}", code),
            None => "a signal".to_string(),
        };
        CommandError::Failed {
            program: program.to_string(),
            status,
            stderr: output.stderr_lossy().trim().to_string(),
        }
    }
}

/// Runs commands with `tokio::process`, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    use_sudo: bool,
}

impl TokioCommandRunner {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let mut command = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(program);
            c
        } else {
            Command::new(program)
        };
        command
            .args(args)
            .stdin(Stdio::null())
            // The scrape deadline drops this future; the child must not outlive it.
            .kill_on_drop(true);

        trace!(program, ?args, sudo = self.use_sudo, "Executing command");
        let output = command.output().await.map_err(|e| CommandError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
