#![allow(dead_code)]

use async_trait::async_trait;
use ondemand_exporter::apache::{ApacheCollector, StatusSource};
use ondemand_exporter::command::CommandError;
use ondemand_exporter::core::{CommandOutput, CommandRunner, IdentityResolver, ProcessSample, ProcessTable};
use ondemand_exporter::passenger::PassengerCollector;
use ondemand_exporter::process::ProcessAccountant;
use ondemand_exporter::scrape::{Scraper, Timeouts};
use ondemand_exporter::sessions::SessionEnumerator;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NGINX_STAGE: &str = "/opt/ood/nginx_stage/sbin/nginx_stage";
pub const FQDN: &str = "ood.example.com";

pub fn data_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(relative)
}

pub fn read_data(relative: &str) -> String {
    std::fs::read_to_string(data_path(relative)).unwrap()
}

pub fn ok_output(stdout: impl Into<Vec<u8>>) -> CommandOutput {
    CommandOutput {
        success: true,
        code: Some(0),
        stdout: stdout.into(),
        stderr: Vec::new(),
    }
}

pub fn failed_output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        code: Some(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

type Responder = Box<dyn Fn(usize) -> CommandOutput + Send + Sync>;

struct Script {
    respond: Responder,
    delay: Duration,
    calls: AtomicUsize,
}

/// A command runner answering from a script keyed by the argument list.
/// Unscripted commands fail as if the program did not exist.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `args` with a fixed output.
    pub fn on(self, args: &[&str], output: CommandOutput) -> Self {
        self.on_call(args, Duration::ZERO, move |_| output.clone())
    }

    /// Answers `args` with a fixed output after `delay`.
    pub fn on_delayed(self, args: &[&str], delay: Duration, output: CommandOutput) -> Self {
        self.on_call(args, delay, move |_| output.clone())
    }

    /// Answers `args` with an output computed from the 1-based call number.
    pub fn on_call<F>(mut self, args: &[&str], delay: Duration, respond: F) -> Self
    where
        F: Fn(usize) -> CommandOutput + Send + Sync + 'static,
    {
        self.scripts.insert(
            args.join(" "),
            Script {
                respond: Box::new(respond),
                delay,
                calls: AtomicUsize::new(0),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push((
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        let Some(script) = self.scripts.get(&args.join(" ")) else {
            return Err(CommandError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
            });
        };
        let call = script.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        Ok((script.respond)(call))
    }
}

type Snapshot = Box<dyn Fn(usize) -> Vec<ProcessSample> + Send + Sync>;

/// A process table returning scripted snapshots, optionally slowly.
pub struct StaticProcessTable {
    snapshot: Snapshot,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticProcessTable {
    pub fn new(samples: Vec<ProcessSample>) -> Self {
        Self::per_call(move |_| samples.clone())
    }

    /// Builds each snapshot from the 1-based call number.
    pub fn per_call<F>(snapshot: F) -> Self
    where
        F: Fn(usize) -> Vec<ProcessSample> + Send + Sync + 'static,
    {
        Self {
            snapshot: Box::new(snapshot),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProcessTable for StaticProcessTable {
    fn snapshot(&self) -> anyhow::Result<Vec<ProcessSample>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok((self.snapshot)(call))
    }
}

/// Resolves names from a fixed map.
pub struct StaticIdentities(pub HashMap<String, u32>);

impl StaticIdentities {
    pub fn new(users: &[(&str, u32)]) -> Self {
        Self(users.iter().map(|(name, uid)| (name.to_string(), *uid)).collect())
    }
}

impl IdentityResolver for StaticIdentities {
    fn uid_for(&self, name: &str) -> Option<u32> {
        self.0.get(name).copied()
    }
}

pub fn sample(pid: u32, uid: u32, cmdline: &str) -> ProcessSample {
    ProcessSample {
        pid,
        uid: Some(uid),
        cmdline: cmdline.to_string(),
        cpu_seconds: 30.0,
        run_time_seconds: 600,
        rss_bytes: 50 * 1024 * 1024,
        vms_bytes: 200 * 1024 * 1024,
        memory_percent: 1.25,
    }
}

pub fn timeouts(limit: Duration) -> Timeouts {
    Timeouts {
        sessions: limit,
        process: limit,
        apache: limit,
        passenger: limit,
    }
}

pub fn apache_collector(status_url: &str) -> ApacheCollector {
    ApacheCollector::new(
        StatusSource {
            explicit_url: Some(status_url.to_string()),
            portal_config_path: PathBuf::from("/nonexistent/ood_portal.yml"),
        },
        true,
    )
    .unwrap()
    .with_hostname(FQDN)
}

/// Wires a scraper from fakes. `status_path` must exist on disk.
pub fn scraper(
    runner: Arc<ScriptedRunner>,
    table: Arc<StaticProcessTable>,
    identities: StaticIdentities,
    apache_url: &str,
    status_path: &Path,
    timeouts: Timeouts,
) -> Scraper {
    let sessions = SessionEnumerator::new(runner.clone(), Arc::new(identities), PathBuf::from(NGINX_STAGE));
    let process = ProcessAccountant::new(table.clone()).with_cores(2);
    let passenger = PassengerCollector::new(runner, table, status_path.to_path_buf()).with_cores(2);
    Scraper::new(sessions, process, apache_collector(apache_url), passenger, timeouts)
}

/// Returns the value of one series in exposition text.
pub fn metric_value(text: &str, series: &str) -> Option<f64> {
    text.lines()
        .find(|line| line.starts_with(series) && line[series.len()..].starts_with(' '))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}
