//! Process accounting for session-owned processes
//!
//! The accountant takes one snapshot of the OS process table, keeps the
//! processes owned by active sessions, and folds them into a portal-wide
//! aggregate: app counts by kind, CPU and memory totals.

use crate::core::{ProcessSample, ProcessTable, SessionSet};
use std::sync::Arc;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use thiserror::Error;
use tracing::{debug, trace};

/// Command-line marker of a Rack (Ruby) application process.
pub const RACK_APP_MARKER: &str = "rack-loader.rb";
/// Command-line marker of a Node.js application process.
pub const NODE_APP_MARKER: &str = "Passenger NodeApp";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to read process table: {0}")]
    Table(#[source] anyhow::Error),

    #[error("process table task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Application kinds recognised by command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    Rack,
    Node,
}

impl AppKind {
    /// Classifies a command line. The Rack marker is checked first, so a
    /// process matches at most one kind.
    pub fn classify(cmdline: &str) -> Option<Self> {
        if cmdline.contains(RACK_APP_MARKER) {
            Some(AppKind::Rack)
        } else if cmdline.contains(NODE_APP_MARKER) {
            Some(AppKind::Node)
        } else {
            None
        }
    }
}

/// Totals across every process owned by an active session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessAggregate {
    pub rack_apps: u64,
    pub node_apps: u64,
    /// Sum of cumulative CPU seconds.
    pub cpu_seconds: f64,
    /// Sum of lifetime CPU percentages divided by the core count.
    pub cpu_percent: f64,
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub memory_percent: f64,
}

/// Lifetime CPU utilisation of one process as a percentage of one core.
pub fn lifetime_cpu_percent(sample: &ProcessSample) -> f64 {
    if sample.run_time_seconds == 0 {
        return 0.0;
    }
    sample.cpu_seconds / sample.run_time_seconds as f64 * 100.0
}

/// Converts a sum of per-core percentages into a share of the whole machine.
pub fn normalize_cpu_percent(per_core_percent: f64, cores: usize) -> f64 {
    if cores == 0 {
        return per_core_percent;
    }
    per_core_percent / cores as f64
}

/// Folds a process table snapshot into the session aggregate.
pub fn aggregate(samples: &[ProcessSample], sessions: &SessionSet, cores: usize) -> ProcessAggregate {
    let mut agg = ProcessAggregate::default();
    let mut per_core_percent = 0.0;

    for sample in samples {
        if !sessions.attributes(sample.uid) {
            trace!(pid = sample.pid, uid = ?sample.uid, cmdline = %sample.cmdline, "Skip proc not owned by PUN");
            continue;
        }
        match AppKind::classify(&sample.cmdline) {
            Some(AppKind::Rack) => agg.rack_apps += 1,
            Some(AppKind::Node) => agg.node_apps += 1,
            None => {}
        }
        agg.cpu_seconds += sample.cpu_seconds;
        per_core_percent += lifetime_cpu_percent(sample);
        agg.rss_bytes += sample.rss_bytes;
        agg.vms_bytes += sample.vms_bytes;
        agg.memory_percent += sample.memory_percent;
    }

    agg.cpu_percent = normalize_cpu_percent(per_core_percent, cores);
    debug!(
        rack = agg.rack_apps,
        node = agg.node_apps,
        cores,
        cpu_percent = agg.cpu_percent,
        "APPS"
    );
    agg
}

/// Aggregates CPU and memory of session-owned processes.
pub struct ProcessAccountant {
    table: Arc<dyn ProcessTable>,
    cores: usize,
}

impl ProcessAccountant {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self {
            table,
            cores: num_cpus::get(),
        }
    }

    /// Overrides the core count used for CPU normalisation.
    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    /// Snapshots the process table on the blocking pool and aggregates it.
    ///
    /// Nothing is returned until the whole table has been read, so a caller
    /// that gives up on the deadline never sees a partial aggregate.
    pub async fn account(&self, sessions: &SessionSet) -> Result<ProcessAggregate, ProcessError> {
        let table = Arc::clone(&self.table);
        let samples = tokio::task::spawn_blocking(move || table.snapshot())
            .await?
            .map_err(ProcessError::Table)?;
        Ok(aggregate(&samples, sessions, self.cores))
    }
}

/// Process table backed by `sysinfo`.
///
/// Every snapshot reads a fresh `System`, so a snapshot abandoned by a timed
/// out caller never delays the next one. Thread entries are skipped; only
/// thread group leaders are reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn snapshot(&self) -> anyhow::Result<Vec<ProcessSample>> {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );

        let total_memory = system.total_memory();
        let samples = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .filter(|arg| !arg.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                let rss_bytes = process.memory();
                let memory_percent = if total_memory > 0 {
                    rss_bytes as f64 / total_memory as f64 * 100.0
                } else {
                    0.0
                };
                ProcessSample {
                    pid: pid.as_u32(),
                    uid: process.user_id().map(|uid| **uid),
                    cmdline: cmdline.trim().to_string(),
                    cpu_seconds: process.accumulated_cpu_time() as f64 / 1000.0,
                    run_time_seconds: process.run_time(),
                    rss_bytes,
                    vms_bytes: process.virtual_memory(),
                    memory_percent,
                }
            })
            .collect();
        Ok(samples)
    }
}
