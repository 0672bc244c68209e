//! # Apache Status Collector
//!
//! Fetches the Apache `server-status` page and counts the proxied connections
//! that belong to the portal: WebSocket relays (interactive apps, noVNC) and
//! client connections from outside the host.
//!
//! - **`status_url`**: decides which URL to fetch on every scrape.
//! - **`table`**: extracts typed connection records from the status HTML.

pub mod status_url;
pub mod table;

use crate::apache::table::{connection_records, ConnectionRecord};
use reqwest::StatusCode;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Request markers of portal traffic. Anything else on the status page is
/// unrelated virtual hosts or Apache's own requests.
pub const RELEVANT_MARKERS: [&str; 6] = ["/node/", "/rnode/", "websockify", "/pun/", "/nginx/", "/oidc"];

/// Request markers of WebSocket-style relays.
pub const WEBSOCKET_MARKERS: [&str; 3] = ["/node/", "/rnode/", "websockify"];

const LOCALHOST: &str = "localhost";
const LOOPBACK: &str = "127.0.0.1";

#[derive(Error, Debug)]
pub enum ApacheError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// A relevant connection after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedConnection {
    pub client: String,
    pub is_websocket: bool,
    pub is_remote: bool,
}

/// Classifies a record, or returns `None` when it is not portal traffic.
pub fn classify(record: &ConnectionRecord, fqdn: &str) -> Option<ClassifiedConnection> {
    let request = record.request.as_str();
    if !RELEVANT_MARKERS.iter().any(|m| request.contains(m)) {
        return None;
    }
    let client = record.client.as_str();
    Some(ClassifiedConnection {
        client: client.to_string(),
        is_websocket: WEBSOCKET_MARKERS.iter().any(|m| request.contains(m)),
        is_remote: ![fqdn, LOCALHOST, LOOPBACK].contains(&client),
    })
}

/// Connection counts from one status page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub websocket_connections: u64,
    pub unique_websocket_clients: u64,
    pub client_connections: u64,
    pub unique_client_connections: u64,
}

/// Counts connections. A connection may be both a WebSocket relay and a
/// remote client connection.
pub fn count_connections(records: &[ConnectionRecord], fqdn: &str) -> ConnectionCounts {
    let mut counts = ConnectionCounts::default();
    let mut websocket_clients = HashSet::new();
    let mut remote_clients = HashSet::new();

    for connection in records.iter().filter_map(|r| classify(r, fqdn)) {
        if connection.is_websocket {
            counts.websocket_connections += 1;
            websocket_clients.insert(connection.client.clone());
        }
        if connection.is_remote {
            counts.client_connections += 1;
            remote_clients.insert(connection.client);
        }
    }

    counts.unique_websocket_clients = websocket_clients.len() as u64;
    counts.unique_client_connections = remote_clients.len() as u64;
    counts
}

/// Parses a status page and counts its connections.
pub fn parse_status_page(html: &str, fqdn: &str) -> ConnectionCounts {
    count_connections(&connection_records(html), fqdn)
}

/// Returns the machine hostname, or `localhost` when it cannot be read.
pub fn local_fqdn() -> String {
    sysinfo::System::host_name()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| LOCALHOST.to_string())
}

/// Where the collector gets its status URL from.
#[derive(Debug, Clone)]
pub struct StatusSource {
    pub explicit_url: Option<String>,
    pub portal_config_path: PathBuf,
}

/// Collects connection counts from Apache.
pub struct ApacheCollector {
    client: reqwest::Client,
    source: StatusSource,
    fqdn: String,
}

impl ApacheCollector {
    pub fn new(source: StatusSource, allow_invalid_certs: bool) -> Result<Self, ApacheError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(allow_invalid_certs)
            .build()
            .map_err(ApacheError::Client)?;
        Ok(Self {
            client,
            source,
            fqdn: local_fqdn(),
        })
    }

    /// Overrides the hostname treated as a local client.
    pub fn with_hostname(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = fqdn.into();
        self
    }

    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// The status URL the next collection will use.
    pub async fn status_url(&self) -> String {
        status_url::resolve(
            self.source.explicit_url.as_deref(),
            &self.source.portal_config_path,
            &self.fqdn,
        )
        .await
    }

    /// Fetches the status page and counts its connections.
    pub async fn collect(&self) -> Result<ConnectionCounts, ApacheError> {
        let url = self.status_url().await;
        debug!(collector = "apache", %url, "Collecting apache metrics");

        let request_error = |source| ApacheError::Request {
            url: url.clone(),
            source,
        };
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => e.to_string(),
            };
            return Err(ApacheError::Status { status, body });
        }
        let html = response.text().await.map_err(request_error)?;

        let counts = parse_status_page(&html, &self.fqdn);
        debug!(collector = "apache", ?counts, "Parsed apache status");
        Ok(counts)
    }
}
