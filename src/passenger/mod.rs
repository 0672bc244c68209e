//! # Passenger Collector
//!
//! Collects per-application load from every Passenger instance serving the
//! portal's sessions.
//!
//! 1. Discovery runs the status binary once and classifies its output
//!    (`discovery::StatusListing`), then reads instance tokens either from the
//!    instance table or from a watchdog process scan.
//! 2. Every instance's XML status document is fetched concurrently and decoded
//!    (`status`). A failing instance is recorded and does not stop the others.
//! 3. Rows from all instances are merged per application root (`aggregate`).

pub mod aggregate;
pub mod discovery;
pub mod status;

use crate::command::CommandError;
use crate::core::{CommandOutput, CommandRunner, ProcessTable, SessionSet};
use crate::passenger::aggregate::{instance_apps, merge, AppGroup, InstanceApp};
use crate::passenger::discovery::{InstanceDiscovery, ListingDiscovery, StatusListing, WatchdogScan};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

const SHOW_XML: &str = "--show=xml";
const PID_IDENTIFIER: &str = "--pid-identifier";
const MULTIPLE_INSTANCES_NOTICE: &str = "It appears that multiple";
const NOT_RUNNING_NOTICE: &str = "Phusion Passenger doesn't seem to be running";

#[derive(Error, Debug)]
pub enum PassengerError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to decode status document: {0}")]
    Decode(#[from] quick_xml::DeError),

    #[error("failed to read process table: {0}")]
    ProcessTable(#[source] anyhow::Error),

    #[error("process table task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A failure to collect one instance.
#[derive(Debug)]
pub struct InstanceError {
    pub instance: String,
    pub error: PassengerError,
}

/// The outcome of one Passenger collection.
#[derive(Debug, Default)]
pub struct PassengerReport {
    /// Number of instances discovered, including ones that failed.
    pub instances: usize,
    /// Applications from the instances that were collected, by app root.
    pub apps: Vec<AppGroup>,
    pub errors: Vec<InstanceError>,
}

impl PassengerReport {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Collects Passenger application metrics.
pub struct PassengerCollector {
    runner: Arc<dyn CommandRunner>,
    table: Arc<dyn ProcessTable>,
    status_path: PathBuf,
    cores: usize,
}

impl PassengerCollector {
    pub fn new(runner: Arc<dyn CommandRunner>, table: Arc<dyn ProcessTable>, status_path: PathBuf) -> Self {
        Self {
            runner,
            table,
            status_path,
            cores: num_cpus::get(),
        }
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    pub async fn collect(&self, sessions: &SessionSet) -> Result<PassengerReport, PassengerError> {
        debug!(collector = "passenger", "Collecting passenger metrics");
        if !self.status_path.is_file() {
            return Err(PassengerError::NotFound(self.status_path.clone()));
        }

        let listing = self.status(None).await?;
        let discovery: Box<dyn InstanceDiscovery> = match StatusListing::classify(listing.stdout_lossy()) {
            StatusListing::SingleInstance => Box::new(WatchdogScan::new(Arc::clone(&self.table))),
            StatusListing::Table(text) => Box::new(ListingDiscovery::new(text)),
        };
        let instances = discovery.discover(sessions).await?;

        let now = chrono::Utc::now().timestamp();
        let results = join_all(instances.iter().map(|instance| self.collect_instance(instance, now))).await;

        let mut rows: Vec<InstanceApp> = Vec::new();
        let mut errors = Vec::new();
        for (instance, result) in instances.iter().zip(results) {
            match result {
                Ok(apps) => rows.extend(apps),
                Err(e) => {
                    error!(collector = "passenger", %instance, error = %e, "Error collecting instance metrics");
                    errors.push(InstanceError {
                        instance: instance.clone(),
                        error: e,
                    });
                }
            }
        }

        Ok(PassengerReport {
            instances: instances.len(),
            apps: merge(&rows),
            errors,
        })
    }

    async fn collect_instance(&self, instance: &str, now: i64) -> Result<Vec<InstanceApp>, PassengerError> {
        debug!(%instance, "Collecting passenger instance metrics");
        let output = self.status(Some(instance)).await?;
        let info = status::parse(&output.stdout)?;
        if info.supergroups().is_empty() {
            warn!(%instance, "Supergroups is empty");
            return Ok(Vec::new());
        }
        Ok(instance_apps(&info, now, self.cores))
    }

    /// Runs the status binary. Exits caused by several running instances or
    /// by no running instance are not failures.
    async fn status(&self, instance: Option<&str>) -> Result<CommandOutput, PassengerError> {
        let program = self.status_path.to_string_lossy();
        let mut args = vec![SHOW_XML];
        if let Some(instance) = instance {
            args.extend([PID_IDENTIFIER, instance]);
        }

        let output = self.runner.run(&program, &args).await?;
        if output.success
            || output.stdout_lossy().contains(MULTIPLE_INSTANCES_NOTICE)
            || output.stderr_lossy().contains(NOT_RUNNING_NOTICE)
        {
            return Ok(output);
        }
        error!(
            program = %program,
            err = %output.stderr_lossy(),
            out = %output.stdout_lossy(),
            "Error executing passenger status"
        );
        Err(CommandError::failed(&program, &output).into())
    }
}
