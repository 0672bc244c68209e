//! Per-application aggregation of Passenger worker processes.

use crate::passenger::status::PassengerInfo;
use crate::process::normalize_cpu_percent;
use std::collections::BTreeMap;
use tracing::debug;

const MICROSECONDS_PER_SECOND: i64 = 1_000_000;
const BYTES_PER_KIB: u64 = 1024;

/// One worker process, converted to exporter units.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessMetric {
    pub rss_bytes: u64,
    pub cpu_percent: f64,
    pub real_memory_bytes: u64,
    pub requests_processed: u64,
    pub runtime_seconds: i64,
}

/// One application as seen by a single Passenger instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceApp {
    pub app_root: String,
    pub processes: Vec<ProcessMetric>,
}

/// Converts a decoded status document into per-application rows.
///
/// `now` is the current time in seconds since the epoch. Supergroups without
/// a group or an application root are skipped.
pub fn instance_apps(info: &PassengerInfo, now: i64, cores: usize) -> Vec<InstanceApp> {
    info.supergroups()
        .iter()
        .filter_map(|supergroup| {
            let group = supergroup.group.as_ref().filter(|g| !g.app_root.is_empty());
            if group.is_none() {
                debug!("Skip supergroup without app root");
            }
            group
        })
        .map(|group| InstanceApp {
            app_root: group.app_root.clone(),
            processes: group
                .processes
                .items
                .iter()
                .map(|p| ProcessMetric {
                    rss_bytes: p.rss * BYTES_PER_KIB,
                    cpu_percent: normalize_cpu_percent(p.cpu, cores),
                    real_memory_bytes: p.real_memory * BYTES_PER_KIB,
                    requests_processed: p.processed,
                    runtime_seconds: now - p.spawn_start_time / MICROSECONDS_PER_SECOND,
                })
                .collect(),
        })
        .collect()
}

/// Totals for one application root across every instance running it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppGroup {
    pub app_root: String,
    /// Number of instances running the application.
    pub instance_count: u64,
    pub process_count: u64,
    pub rss_bytes: u64,
    pub real_memory_bytes: u64,
    pub cpu_percent: f64,
    pub requests_processed: u64,
    pub runtime_seconds: i64,
}

impl AppGroup {
    fn new(app_root: &str) -> Self {
        Self {
            app_root: app_root.to_string(),
            ..Default::default()
        }
    }

    fn absorb(&mut self, app: &InstanceApp) {
        self.instance_count += 1;
        for process in &app.processes {
            self.process_count += 1;
            self.rss_bytes += process.rss_bytes;
            self.real_memory_bytes += process.real_memory_bytes;
            self.cpu_percent += process.cpu_percent;
            self.requests_processed += process.requests_processed;
            self.runtime_seconds += process.runtime_seconds;
        }
    }

    /// Mean process runtime, 0 for an application with no processes.
    pub fn average_runtime_seconds(&self) -> f64 {
        if self.process_count == 0 {
            return 0.0;
        }
        self.runtime_seconds as f64 / self.process_count as f64
    }
}

/// Merges rows from all instances into one group per application root,
/// ordered by application root.
pub fn merge<'a>(apps: impl IntoIterator<Item = &'a InstanceApp>) -> Vec<AppGroup> {
    let mut groups: BTreeMap<&str, AppGroup> = BTreeMap::new();
    for app in apps {
        groups
            .entry(app.app_root.as_str())
            .or_insert_with(|| AppGroup::new(&app.app_root))
            .absorb(app);
    }
    groups.into_values().collect()
}
