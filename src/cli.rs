//! Command-Line Interface (CLI) argument parsing.
//!
//! The arguments are parsed at startup and merged over the configuration file
//! and environment variables. Only arguments that were given are merged.

use clap::Parser;
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Prometheus exporter for Open OnDemand.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Address to listen on for HTTP requests.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Run status commands directly instead of through sudo.
    #[arg(long)]
    pub no_sudo: bool,

    /// Timeout for listing PUNs.
    #[arg(long, value_name = "SECONDS")]
    pub puns_timeout: Option<u64>,

    /// Timeout for collecting process metrics.
    #[arg(long, value_name = "SECONDS")]
    pub process_timeout: Option<u64>,

    /// Timeout for collecting Apache metrics.
    #[arg(long, value_name = "SECONDS")]
    pub apache_timeout: Option<u64>,

    /// Timeout for collecting Passenger metrics.
    #[arg(long, value_name = "SECONDS")]
    pub passenger_timeout: Option<u64>,

    /// Apache server-status URL. Derived from ood_portal.yml when not set.
    #[arg(long, value_name = "URL")]
    pub apache_status_url: Option<String>,

    /// Path to the OnDemand passenger-status binary.
    #[arg(long, value_name = "PATH")]
    pub passenger_status_path: Option<PathBuf>,
}

fn insert_nested(dict: &mut Dict, section: &str, key: &str, value: Value) {
    let entry = dict
        .entry(section.to_string())
        .or_insert_with(|| Value::Dict(Tag::Default, Dict::new()));
    if let Value::Dict(_, inner) = entry {
        inner.insert(key.to_string(), value);
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(listen) = &self.listen {
            dict.insert("listen_address".into(), Value::from(listen.clone()));
        }
        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }
        // Absent means "not given", so only an explicit flag overrides.
        if self.no_sudo {
            dict.insert("use_sudo".into(), Value::from(false));
        }

        for (section, timeout) in [
            ("puns", self.puns_timeout),
            ("process", self.process_timeout),
            ("apache", self.apache_timeout),
            ("passenger", self.passenger_timeout),
        ] {
            if let Some(seconds) = timeout {
                insert_nested(&mut dict, section, "timeout_seconds", Value::from(seconds));
            }
        }

        if let Some(url) = &self.apache_status_url {
            insert_nested(&mut dict, "apache", "status_url", Value::from(url.clone()));
        }
        if let Some(path) = &self.passenger_status_path {
            insert_nested(
                &mut dict,
                "passenger",
                "status_path",
                Value::from(path.to_string_lossy().into_owned()),
            );
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
