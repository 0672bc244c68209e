//! # Exporter Process Metrics
//!
//! Samples the exporter's own CPU time and resident memory with `sysinfo`.
//! Sampling happens on every scrape, so the values are never older than the
//! response that carries them.

use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::error;

/// Resource usage of the exporter process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelfUsage {
    pub cpu_seconds: f64,
    pub resident_memory_bytes: u64,
}

/// Samples resource usage of the current process.
pub struct SystemCollector {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCollector {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                error!("Failed to get current PID: {}", e);
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Returns the current usage, or `None` if the process cannot be read.
    pub fn sample(&self) -> Option<SelfUsage> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let process = system.process(pid)?;
        Some(SelfUsage {
            cpu_seconds: process.accumulated_cpu_time() as f64 / 1000.0,
            resident_memory_bytes: process.memory(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_reports_own_memory() {
        let usage = SystemCollector::new().sample().unwrap();
        assert!(usage.resident_memory_bytes > 0);
        assert!(usage.cpu_seconds >= 0.0);
    }
}
