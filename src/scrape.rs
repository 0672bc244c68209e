//! # Scrape Orchestrator
//!
//! One scrape cycle:
//!
//! 1. Sessions are enumerated under their own deadline. The other collectors
//!    need the session set, so a failure here ends the cycle.
//! 2. The process, Apache and Passenger collectors run concurrently, each
//!    bounded by its own deadline. A collector that fails or times out only
//!    affects its own outcome.
//!
//! Cycles are serialized: a scrape requested while another is in flight waits
//! for it to finish and then runs its own cycle.

use crate::apache::{ApacheCollector, ApacheError, ConnectionCounts, StatusSource};
use crate::command::TokioCommandRunner;
use crate::config::Config;
use crate::core::{CommandRunner, IdentityResolver, ProcessTable, SessionSet, Subsystem};
use crate::passenger::{PassengerCollector, PassengerReport};
use crate::process::{ProcessAccountant, ProcessAggregate, SysinfoProcessTable};
use crate::sessions::{SessionEnumerator, SystemIdentityResolver};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// The result of one time-bounded unit of collection.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed { value: T, duration: Duration },
    Failed { error: anyhow::Error },
    TimedOut,
}

impl<T> Outcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Completed { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Runs `fut` under `limit`. Errors and timeouts are logged here and
/// reported through the returned outcome, never both for one run.
pub async fn run_timed<T, E, F>(subsystem: Subsystem, limit: Duration, fut: F) -> Outcome<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let start = Instant::now();
    match tokio::time::timeout(limit, fut).await {
        Err(_) => {
            error!(collector = %subsystem, timeout = ?limit, "Timeout collecting metrics");
            Outcome::TimedOut
        }
        Ok(Err(e)) => {
            let error = e.into();
            error!(collector = %subsystem, error = %format!("{error:#}"), "Collector failed");
            Outcome::Failed { error }
        }
        Ok(Ok(value)) => {
            let duration = start.elapsed();
            debug!(collector = %subsystem, ?duration, "Collector finished");
            Outcome::Completed { value, duration }
        }
    }
}

/// Outcomes of the collectors that depend on the session set.
#[derive(Debug)]
pub struct CollectorOutcomes {
    pub process: Outcome<ProcessAggregate>,
    pub apache: Outcome<ConnectionCounts>,
    pub passenger: Outcome<PassengerReport>,
}

/// Everything observed during one scrape cycle.
#[derive(Debug)]
pub struct ScrapeReport {
    pub sessions: Outcome<SessionSet>,
    /// `None` when the cycle ended after session enumeration.
    pub collectors: Option<CollectorOutcomes>,
}

/// Per-subsystem deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub sessions: Duration,
    pub process: Duration,
    pub apache: Duration,
    pub passenger: Duration,
}

impl From<&Config> for Timeouts {
    fn from(config: &Config) -> Self {
        Self {
            sessions: config.puns.timeout(),
            process: config.process.timeout(),
            apache: config.apache.timeout(),
            passenger: config.passenger.timeout(),
        }
    }
}

/// The OS-facing collaborators shared by the collectors.
#[derive(Clone)]
pub struct ScraperDeps {
    pub runner: Arc<dyn CommandRunner>,
    pub table: Arc<dyn ProcessTable>,
    pub identities: Arc<dyn IdentityResolver>,
}

impl ScraperDeps {
    /// Production collaborators.
    pub fn system(use_sudo: bool) -> Self {
        Self {
            runner: Arc::new(TokioCommandRunner::new(use_sudo)),
            table: Arc::new(SysinfoProcessTable::new()),
            identities: Arc::new(SystemIdentityResolver),
        }
    }
}

/// Runs scrape cycles.
pub struct Scraper {
    cycle: Mutex<()>,
    sessions: SessionEnumerator,
    process: ProcessAccountant,
    apache: ApacheCollector,
    passenger: PassengerCollector,
    timeouts: Timeouts,
}

impl Scraper {
    pub fn new(
        sessions: SessionEnumerator,
        process: ProcessAccountant,
        apache: ApacheCollector,
        passenger: PassengerCollector,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            cycle: Mutex::new(()),
            sessions,
            process,
            apache,
            passenger,
            timeouts,
        }
    }

    /// Wires all collectors from configuration.
    pub fn from_config(config: &Config, deps: ScraperDeps) -> Result<Self, ApacheError> {
        let sessions = SessionEnumerator::new(
            Arc::clone(&deps.runner),
            Arc::clone(&deps.identities),
            config.puns.nginx_stage_path.clone(),
        );
        let process = ProcessAccountant::new(Arc::clone(&deps.table));
        let apache = ApacheCollector::new(
            StatusSource {
                explicit_url: config.apache.status_url.clone(),
                portal_config_path: config.apache.portal_config_path.clone(),
            },
            config.apache.allow_invalid_certs,
        )?;
        let passenger = PassengerCollector::new(deps.runner, deps.table, config.passenger.status_path.clone());
        Ok(Self::new(sessions, process, apache, passenger, Timeouts::from(config)))
    }

    /// Runs one full scrape cycle.
    pub async fn scrape(&self) -> ScrapeReport {
        let _cycle = self.cycle.lock().await;
        debug!("Starting scrape cycle");

        let sessions = run_timed(Subsystem::Puns, self.timeouts.sessions, self.sessions.enumerate()).await;
        let Some(set) = sessions.value() else {
            return ScrapeReport {
                sessions,
                collectors: None,
            };
        };

        let (process, apache, passenger) = tokio::join!(
            run_timed(Subsystem::Process, self.timeouts.process, self.process.account(set)),
            run_timed(Subsystem::Apache, self.timeouts.apache, self.apache.collect()),
            run_timed(Subsystem::Passenger, self.timeouts.passenger, self.passenger.collect(set)),
        );

        ScrapeReport {
            collectors: Some(CollectorOutcomes {
                process,
                apache,
                passenger,
            }),
            sessions,
        }
    }
}
