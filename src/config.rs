//! Configuration management for the OnDemand exporter
//!
//! This module defines the main `Config` struct and its sub-structs, which
//! are passed into each collector's constructor. Settings are layered with
//! `figment`: built-in defaults, an optional TOML file, environment variables
//! and finally command-line arguments.

use crate::cli::Cli;
use anyhow::{ensure, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables, e.g. `ONDEMAND_EXPORTER_APACHE__TIMEOUT_SECONDS`.
pub const ENV_PREFIX: &str = "ONDEMAND_EXPORTER_";

/// Unprefixed variables understood by earlier releases of the exporter.
const LEGACY_ENV: [(&str, &str); 3] = [
    ("PUNS_TIMEOUT", "puns.timeout_seconds"),
    ("APACHE_STATUS_URL", "apache.status_url"),
    ("APACHE_TIMEOUT", "apache.timeout_seconds"),
];

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level, used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Address the HTTP server listens on.
    pub listen_address: String,
    /// Run external status commands through `sudo`.
    pub use_sudo: bool,
    pub puns: PunsConfig,
    pub process: ProcessConfig,
    pub apache: ApacheConfig,
    pub passenger: PassengerConfig,
    pub metrics: MetricsConfig,
}

/// Session enumeration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PunsConfig {
    pub timeout_seconds: u64,
    /// The `nginx_stage` binary that lists active sessions.
    pub nginx_stage_path: PathBuf,
}

/// Process accounting.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProcessConfig {
    pub timeout_seconds: u64,
}

/// Apache status collection.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApacheConfig {
    /// Explicit `server-status` URL. Derived from the portal config if unset.
    #[serde(default)]
    pub status_url: Option<String>,
    pub portal_config_path: PathBuf,
    pub timeout_seconds: u64,
    /// Accept self-signed certificates on the status endpoint.
    pub allow_invalid_certs: bool,
}

/// Passenger status collection.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PassengerConfig {
    pub timeout_seconds: u64,
    pub status_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Publish the exporter's own CPU and memory usage.
    pub system_metrics_enabled: bool,
}

impl PunsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ProcessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ApacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl PassengerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    /// Defaults, the optional TOML file and the environment, without the CLI.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&LEGACY_ENV.map(|(name, _)| name))
                    .map(|key| {
                        LEGACY_ENV
                            .iter()
                            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                            .map(|(_, path)| (*path).into())
                            .unwrap_or_else(|| key.into())
                    }),
            )
    }

    /// Loads and validates the configuration, with `cli` taking precedence.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config: Config = Self::figment(cli.config_file.as_deref())
            .merge(cli)
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no collector can work with.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        for (name, seconds) in [
            ("puns", self.puns.timeout_seconds),
            ("process", self.process.timeout_seconds),
            ("apache", self.apache.timeout_seconds),
            ("passenger", self.passenger.timeout_seconds),
        ] {
            ensure!(seconds > 0, "{name}.timeout_seconds must be greater than zero");
        }
        ensure!(
            !self.puns.nginx_stage_path.as_os_str().is_empty(),
            "puns.nginx_stage_path must not be empty"
        );
        ensure!(
            !self.passenger.status_path.as_os_str().is_empty(),
            "passenger.status_path must not be empty"
        );
        Ok(())
    }

    /// The parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("invalid listen_address {:?}", self.listen_address))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            listen_address: "0.0.0.0:9301".to_string(),
            use_sudo: true,
            puns: PunsConfig {
                timeout_seconds: 10,
                nginx_stage_path: PathBuf::from("/opt/ood/nginx_stage/sbin/nginx_stage"),
            },
            process: ProcessConfig { timeout_seconds: 10 },
            apache: ApacheConfig {
                status_url: None,
                portal_config_path: PathBuf::from("/etc/ood/config/ood_portal.yml"),
                timeout_seconds: 10,
                allow_invalid_certs: true,
            },
            passenger: PassengerConfig {
                timeout_seconds: 30,
                status_path: PathBuf::from("/usr/sbin/ondemand-passenger-status"),
            },
            metrics: MetricsConfig {
                system_metrics_enabled: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.socket_addr().unwrap().port(), 9301);
        assert_eq!(config.passenger.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.apache.timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("apache.timeout_seconds"));
    }

    #[test]
    fn test_validate_rejects_bad_listen_address() {
        let config = Config {
            listen_address: "not-an-address".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
