//! Resolution of the Apache `server-status` URL.
//!
//! An explicitly configured URL always wins. Otherwise the URL is derived from
//! the portal configuration file: its `servername` and `port` decide the host
//! and scheme. The file is re-read on every call so portal changes are picked
//! up without a restart.

use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, error, info};

const STATUS_PATH: &str = "/server-status";
const PLAIN_HTTP_PORT: &str = "80";

/// The fields of the portal file that affect the status URL.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PortalSettings {
    pub servername: String,
    pub port: String,
}

impl PortalSettings {
    /// Parses the portal YAML. `port` may be written as a number or a string.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yml::Error> {
        let value: serde_yml::Value = serde_yml::from_str(content)?;
        let servername = value
            .get("servername")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        let port = match value.get("port") {
            Some(serde_yml::Value::Number(n)) => n.to_string(),
            Some(serde_yml::Value::String(s)) => s.trim().to_string(),
            _ => String::new(),
        };
        Ok(Self { servername, port })
    }

    /// Builds the status URL, falling back to `fqdn` for an empty servername.
    pub fn status_url(&self, fqdn: &str) -> String {
        let host = if self.servername.is_empty() {
            fqdn
        } else {
            &self.servername
        };
        let scheme = if self.port.is_empty() || self.port == PLAIN_HTTP_PORT {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{host}{STATUS_PATH}")
    }
}

/// The URL used when the portal file is absent or unusable.
pub fn default_status_url(fqdn: &str) -> String {
    format!("http://{fqdn}{STATUS_PATH}")
}

/// Resolves the status URL for one scrape.
pub async fn resolve(explicit: Option<&str>, portal_config_path: &Path, fqdn: &str) -> String {
    if let Some(url) = explicit.filter(|u| !u.is_empty()) {
        return url.to_string();
    }

    let content = match tokio::fs::read_to_string(portal_config_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(file = %portal_config_path.display(), "File not found, using default Apache status URL");
            return default_status_url(fqdn);
        }
        Err(e) => {
            error!(file = %portal_config_path.display(), error = %e, "Error reading portal config");
            return default_status_url(fqdn);
        }
    };

    match PortalSettings::from_yaml(&content) {
        Ok(settings) => {
            debug!(
                file = %portal_config_path.display(),
                servername = %settings.servername,
                port = %settings.port,
                "Parsed portal config"
            );
            settings.status_url(fqdn)
        }
        Err(e) => {
            error!(file = %portal_config_path.display(), error = %e, "Error parsing portal config");
            default_status_url(fqdn)
        }
    }
}
