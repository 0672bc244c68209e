//! Passenger instance discovery.
//!
//! `passenger-status --show=xml` without an instance argument either lists
//! the running instances as a table (several instances) or prints the status
//! document of the only instance. In the latter case the instance ids are not
//! shown, so instances are found by scanning for session-owned watchdogs and
//! addressing them by pid.

use crate::core::{ProcessTable, SessionSet};
use crate::passenger::PassengerError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Exact command line of a Passenger watchdog process.
pub const WATCHDOG_CMDLINE: &str = "Passenger watchdog";

const XML_DECLARATION: &str = "<?xml";
const SEPARATOR_PREFIX: &str = "---";
const LISTING_FIELDS: usize = 4;
const LISTING_TOKEN_FIELD: usize = 1;

/// How the discovery output has to be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusListing {
    /// A status document of a single instance; ids must be found elsewhere.
    SingleInstance,
    /// A table of running instances.
    Table(String),
}

impl StatusListing {
    pub fn classify(stdout: String) -> Self {
        if stdout.starts_with(XML_DECLARATION) {
            StatusListing::SingleInstance
        } else {
            StatusListing::Table(stdout)
        }
    }
}

/// A source of instance tokens accepted by `--pid-identifier`.
#[async_trait]
pub trait InstanceDiscovery: Send + Sync {
    async fn discover(&self, sessions: &SessionSet) -> Result<Vec<String>, PassengerError>;
}

/// Reads instance ids from the instance table.
pub struct ListingDiscovery {
    listing: String,
}

impl ListingDiscovery {
    pub fn new(listing: String) -> Self {
        Self { listing }
    }
}

/// Returns the token column of every well-formed row after the separator.
pub fn parse_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip_while(|line| !line.starts_with(SEPARATOR_PREFIX))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            (fields.len() == LISTING_FIELDS).then(|| fields[LISTING_TOKEN_FIELD].to_string())
        })
        .collect()
}

#[async_trait]
impl InstanceDiscovery for ListingDiscovery {
    async fn discover(&self, _sessions: &SessionSet) -> Result<Vec<String>, PassengerError> {
        let instances = parse_listing(&self.listing);
        debug!(?instances, "Passenger instances from listing");
        Ok(instances)
    }
}

/// Finds instances by their session-owned watchdog processes.
pub struct WatchdogScan {
    table: Arc<dyn ProcessTable>,
}

impl WatchdogScan {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl InstanceDiscovery for WatchdogScan {
    async fn discover(&self, sessions: &SessionSet) -> Result<Vec<String>, PassengerError> {
        let table = Arc::clone(&self.table);
        let samples = tokio::task::spawn_blocking(move || table.snapshot())
            .await?
            .map_err(PassengerError::ProcessTable)?;

        let pids: Vec<String> = samples
            .iter()
            .filter(|sample| {
                if !sessions.attributes(sample.uid) {
                    trace!(pid = sample.pid, uid = ?sample.uid, "Skip PID that does not belong to PUN");
                    return false;
                }
                sample.cmdline == WATCHDOG_CMDLINE
            })
            .map(|sample| sample.pid.to_string())
            .collect();
        debug!(instances = ?pids, "Passenger instances from watchdog scan");
        Ok(pids)
    }
}
