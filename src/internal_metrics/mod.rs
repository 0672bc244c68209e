//! # Internal Metrics Module
//!
//! Turns scrape reports into Prometheus exposition text.
//!
//! ## Components:
//!
//! - **`MetricsExporter`**: runs one scrape cycle per request and renders it.
//!   Every render installs a fresh `PrometheusRecorder` as the local recorder,
//!   so a response holds the observations of exactly one cycle and series of
//!   applications that disappeared are not carried over.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.
//!
//! - **`SystemCollector`**: (Defined in `system.rs`) Samples the exporter's
//!   own CPU and memory usage.

use crate::core::Subsystem;
use crate::internal_metrics::system::{SelfUsage, SystemCollector};
use crate::scrape::{Outcome, ScrapeReport, Scraper};
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusBuilder;

pub mod server;
pub mod system;

pub const COLLECT_DURATION: &str = "ondemand_exporter_collect_duration_seconds";
pub const COLLECT_TIMEOUT: &str = "ondemand_exporter_collect_timeout";
pub const COLLECT_ERROR: &str = "ondemand_exporter_collect_error";
pub const BUILD_INFO: &str = "ondemand_exporter_build_info";
pub const ACTIVE_PUNS: &str = "ondemand_active_puns";
pub const RACK_APPS: &str = "ondemand_rack_apps";
pub const NODE_APPS: &str = "ondemand_node_apps";
pub const PUN_CPU_PERCENT: &str = "ondemand_pun_cpu_percent";
pub const PUN_CPU_TIME: &str = "ondemand_pun_cpu_time_seconds";
pub const PUN_MEMORY: &str = "ondemand_pun_memory";
pub const PUN_MEMORY_PERCENT: &str = "ondemand_pun_memory_percent";
pub const WEBSOCKET_CONNECTIONS: &str = "ondemand_websocket_connections";
pub const UNIQUE_WEBSOCKET_CLIENTS: &str = "ondemand_unique_websocket_clients";
pub const CLIENT_CONNECTIONS: &str = "ondemand_client_connections";
pub const UNIQUE_CLIENT_CONNECTIONS: &str = "ondemand_unique_client_connections";
pub const PASSENGER_INSTANCES: &str = "ondemand_passenger_instances";
pub const PASSENGER_APP_COUNT: &str = "ondemand_passenger_app_count";
pub const PASSENGER_APP_PROCESSES: &str = "ondemand_passenger_app_processes";
pub const PASSENGER_APP_RSS: &str = "ondemand_passenger_app_rss_bytes";
pub const PASSENGER_APP_REAL_MEMORY: &str = "ondemand_passenger_app_real_memory_bytes";
pub const PASSENGER_APP_CPU: &str = "ondemand_passenger_app_cpu_percent";
pub const PASSENGER_APP_REQUESTS: &str = "ondemand_passenger_app_requests_total";
pub const PASSENGER_APP_AVG_RUNTIME: &str = "ondemand_passenger_app_average_runtime_seconds";
pub const EXPORTER_CPU: &str = "ondemand_exporter_process_cpu_seconds";
pub const EXPORTER_RSS: &str = "ondemand_exporter_process_resident_memory_bytes";

/// Registers descriptions for every metric with the current recorder.
pub fn describe_all() {
    metrics::describe_gauge!(COLLECT_DURATION, Unit::Seconds, "Duration of a collection");
    metrics::describe_gauge!(COLLECT_TIMEOUT, Unit::Count, "Indicates the collector timed out");
    metrics::describe_gauge!(COLLECT_ERROR, Unit::Count, "Indicates if an error has occurred during collection");
    metrics::describe_gauge!(BUILD_INFO, "Build information of the exporter (always 1)");
    metrics::describe_gauge!(ACTIVE_PUNS, Unit::Count, "Active PUNs");
    metrics::describe_gauge!(RACK_APPS, Unit::Count, "Number of running Rack apps");
    metrics::describe_gauge!(NODE_APPS, Unit::Count, "Number of running NodeJS apps");
    metrics::describe_gauge!(PUN_CPU_PERCENT, Unit::Percent, "Percent CPU of all PUNs");
    metrics::describe_gauge!(PUN_CPU_TIME, Unit::Seconds, "Cumulative CPU time of all PUNs");
    metrics::describe_gauge!(PUN_MEMORY, Unit::Bytes, "Memory used by all PUNs");
    metrics::describe_gauge!(PUN_MEMORY_PERCENT, Unit::Percent, "Percent memory of all PUNs");
    metrics::describe_gauge!(WEBSOCKET_CONNECTIONS, Unit::Count, "Number of websocket connections");
    metrics::describe_gauge!(UNIQUE_WEBSOCKET_CLIENTS, Unit::Count, "Unique websocket connections");
    metrics::describe_gauge!(CLIENT_CONNECTIONS, Unit::Count, "Number of client connections");
    metrics::describe_gauge!(UNIQUE_CLIENT_CONNECTIONS, Unit::Count, "Unique client connections");
    metrics::describe_gauge!(PASSENGER_INSTANCES, Unit::Count, "Number of Passenger instances");
    metrics::describe_gauge!(PASSENGER_APP_COUNT, Unit::Count, "Count of passenger instances of an app");
    metrics::describe_gauge!(PASSENGER_APP_PROCESSES, Unit::Count, "Process count of an app");
    metrics::describe_gauge!(PASSENGER_APP_RSS, Unit::Bytes, "RSS of passenger apps");
    metrics::describe_gauge!(PASSENGER_APP_REAL_MEMORY, Unit::Bytes, "Real memory of passenger apps");
    metrics::describe_gauge!(PASSENGER_APP_CPU, Unit::Percent, "CPU percent of passenger apps");
    metrics::describe_counter!(PASSENGER_APP_REQUESTS, Unit::Count, "Requests made to passenger apps");
    metrics::describe_gauge!(PASSENGER_APP_AVG_RUNTIME, Unit::Seconds, "Average runtime in seconds of passenger apps");
    metrics::describe_gauge!(EXPORTER_CPU, Unit::Seconds, "CPU time consumed by the exporter process");
    metrics::describe_gauge!(EXPORTER_RSS, Unit::Bytes, "Resident memory of the exporter process");
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Publishes the timeout, error and duration series of one subsystem.
fn publish_status<T>(subsystem: Subsystem, outcome: &Outcome<T>, partial: bool) {
    let collector = subsystem.as_str();
    metrics::gauge!(COLLECT_TIMEOUT, "collector" => collector).set(flag(outcome.is_timed_out()));
    metrics::gauge!(COLLECT_ERROR, "collector" => collector).set(flag(outcome.is_failed() || partial));
    if let Outcome::Completed { duration, .. } = outcome {
        metrics::gauge!(COLLECT_DURATION, "collector" => collector).set(duration.as_secs_f64());
    }
}

/// Publishes every observation in `report` to the current recorder.
pub fn publish(report: &ScrapeReport) {
    publish_status(Subsystem::Puns, &report.sessions, false);
    if let Some(sessions) = report.sessions.value() {
        metrics::gauge!(ACTIVE_PUNS).set(sessions.len() as f64);
    }

    let Some(collectors) = &report.collectors else {
        return;
    };

    publish_status(Subsystem::Process, &collectors.process, false);
    if let Some(agg) = collectors.process.value() {
        metrics::gauge!(RACK_APPS).set(agg.rack_apps as f64);
        metrics::gauge!(NODE_APPS).set(agg.node_apps as f64);
        metrics::gauge!(PUN_CPU_PERCENT).set(agg.cpu_percent);
        metrics::gauge!(PUN_CPU_TIME).set(agg.cpu_seconds);
        metrics::gauge!(PUN_MEMORY, "type" => "rss").set(agg.rss_bytes as f64);
        metrics::gauge!(PUN_MEMORY, "type" => "vms").set(agg.vms_bytes as f64);
        metrics::gauge!(PUN_MEMORY_PERCENT).set(agg.memory_percent);
    }

    publish_status(Subsystem::Apache, &collectors.apache, false);
    if let Some(counts) = collectors.apache.value() {
        metrics::gauge!(WEBSOCKET_CONNECTIONS).set(counts.websocket_connections as f64);
        metrics::gauge!(UNIQUE_WEBSOCKET_CLIENTS).set(counts.unique_websocket_clients as f64);
        metrics::gauge!(CLIENT_CONNECTIONS).set(counts.client_connections as f64);
        metrics::gauge!(UNIQUE_CLIENT_CONNECTIONS).set(counts.unique_client_connections as f64);
    }

    let partial = collectors
        .passenger
        .value()
        .is_some_and(|report| report.is_partial());
    publish_status(Subsystem::Passenger, &collectors.passenger, partial);
    if let Some(passenger) = collectors.passenger.value() {
        for app in &passenger.apps {
            let app_root = app.app_root.as_str();
            metrics::gauge!(PASSENGER_APP_COUNT, "app" => app_root.to_string()).set(app.instance_count as f64);
            metrics::gauge!(PASSENGER_APP_PROCESSES, "app" => app_root.to_string()).set(app.process_count as f64);
            metrics::gauge!(PASSENGER_APP_RSS, "app" => app_root.to_string()).set(app.rss_bytes as f64);
            metrics::gauge!(PASSENGER_APP_REAL_MEMORY, "app" => app_root.to_string()).set(app.real_memory_bytes as f64);
            metrics::gauge!(PASSENGER_APP_CPU, "app" => app_root.to_string()).set(app.cpu_percent);
            metrics::counter!(PASSENGER_APP_REQUESTS, "app" => app_root.to_string()).absolute(app.requests_processed);
            metrics::gauge!(PASSENGER_APP_AVG_RUNTIME, "app" => app_root.to_string()).set(app.average_runtime_seconds());
        }
        metrics::gauge!(PASSENGER_INSTANCES).set(passenger.instances as f64);
    }
}

/// Publishes the exporter's build information and resource usage.
pub fn publish_exporter(version: &'static str, usage: Option<SelfUsage>) {
    metrics::gauge!(BUILD_INFO, "version" => version).set(1.0);
    if let Some(usage) = usage {
        metrics::gauge!(EXPORTER_CPU).set(usage.cpu_seconds);
        metrics::gauge!(EXPORTER_RSS).set(usage.resident_memory_bytes as f64);
    }
}

/// Renders one report into Prometheus exposition text.
pub fn render(report: &ScrapeReport, usage: Option<SelfUsage>) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        describe_all();
        publish_exporter(env!("CARGO_PKG_VERSION"), usage);
        publish(report);
    });
    handle.render()
}

/// Scrapes on demand and renders the result.
pub struct MetricsExporter {
    scraper: Scraper,
    system: Option<SystemCollector>,
}

impl MetricsExporter {
    pub fn new(scraper: Scraper, system_metrics_enabled: bool) -> Self {
        Self {
            scraper,
            system: system_metrics_enabled.then(SystemCollector::new),
        }
    }

    /// Runs one scrape cycle and returns its exposition text.
    pub async fn scrape_and_render(&self) -> String {
        let report = self.scraper.scrape().await;
        let usage = self.system.as_ref().and_then(SystemCollector::sample);
        render(&report, usage)
    }
}
