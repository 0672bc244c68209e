//! Core domain types and collaborator traits for the exporter
//!
//! This module defines the data every scrape cycle passes around (the active
//! session set, process samples) and the trait contracts for the external
//! collaborators the collectors depend on. Production implementations live in
//! `command`, `process` and `sessions`; tests substitute fakes.

use crate::command::CommandError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;

/// Numeric owner id of the privileged account. Processes it owns are never
/// attributed to a session.
pub const ROOT_UID: u32 = 0;

/// One active per-user portal session (a PUN).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The session id as printed by the listing command (a user name).
    pub name: String,
    /// The owning numeric identity, when the name could be resolved.
    pub uid: Option<u32>,
}

/// The immutable set of sessions discovered at the start of a scrape cycle.
///
/// Sessions keep the order the listing command produced them in. The set is
/// shared read-only by all collectors of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSet {
    sessions: Vec<Session>,
    uids: HashSet<u32>,
}

impl SessionSet {
    pub fn new(sessions: Vec<Session>) -> Self {
        let uids = sessions.iter().filter_map(|s| s.uid).collect();
        Self { sessions, uids }
    }

    /// Number of sessions, including ones whose owner could not be resolved.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Session names in listing order.
    pub fn names(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns true if `uid` owns one of the sessions.
    pub fn owns(&self, uid: u32) -> bool {
        self.uids.contains(&uid)
    }

    /// Returns true if a process owned by `uid` should be attributed to a
    /// session: the owner is known, is not root, and owns a session.
    pub fn attributes(&self, uid: Option<u32>) -> bool {
        match uid {
            Some(ROOT_UID) | None => false,
            Some(uid) => self.owns(uid),
        }
    }
}

/// A point-in-time view of one OS process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub uid: Option<u32>,
    /// Command line arguments joined by single spaces.
    pub cmdline: String,
    /// Cumulative CPU time (user + system) in seconds.
    pub cpu_seconds: f64,
    /// Seconds since the process started.
    pub run_time_seconds: u64,
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    /// Resident memory as a percentage of total system memory.
    pub memory_percent: f64,
}

/// The sub-collectors of a scrape cycle, used as the `collector` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Puns,
    Process,
    Apache,
    Passenger,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Puns => "puns",
            Subsystem::Process => "process",
            Subsystem::Apache => "apache",
            Subsystem::Passenger => "passenger",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// True when the command exited with status 0.
    pub success: bool,
    /// Exit code, or `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and captures its output.
    ///
    /// A non-zero exit status is reported through `CommandOutput::success`,
    /// not as an error; callers decide which failures they tolerate. The
    /// caller bounds the call with its own deadline, and dropping the returned
    /// future must stop the child process.
    ///
    /// # Returns
    /// * `Ok(CommandOutput)` once the command has exited
    /// * `Err` if the command could not be started
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError>;
}

/// Provides a snapshot of the OS process table.
///
/// Implementations may block; callers run them on the blocking thread pool.
pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<Vec<ProcessSample>>;
}

/// Resolves session names to numeric owner ids.
pub trait IdentityResolver: Send + Sync {
    /// Returns the uid for `name`, or `None` if no such account exists.
    fn uid_for(&self, name: &str) -> Option<u32>;
}
