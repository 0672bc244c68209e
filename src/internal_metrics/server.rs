//! # Metrics Server
//!
//! An `axum` server with two routes: `/metrics`, which runs a scrape cycle
//! and returns it in the Prometheus exposition format, and `/`, a small
//! landing page pointing at it.
//!
//! The server stops when the shutdown channel changes.

use crate::internal_metrics::MetricsExporter;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

pub const METRICS_PATH: &str = "/metrics";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const LANDING_PAGE: &str = r#"<html>
<head><title>OnDemand Exporter</title></head>
<body>
<h1>OnDemand Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#;

async fn metrics_handler(State(exporter): State<Arc<MetricsExporter>>) -> impl IntoResponse {
    let body = exporter.scrape_and_render().await;
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}

async fn landing_page() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// Builds the router serving the exporter.
pub fn router(exporter: Arc<MetricsExporter>) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(exporter)
}

/// Serves scrape requests until shutdown.
pub struct MetricsServer {
    listener: TcpListener,
    exporter: Arc<MetricsExporter>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `exporter` - Scrapes and renders each request.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(listener: TcpListener, exporter: Arc<MetricsExporter>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            listener,
            exporter,
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(mut self) -> impl Future<Output = ()> {
        let app = router(self.exporter);

        async move {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    trace!("Metrics server received shutdown signal via select.");
                }
                result = axum::serve(self.listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!("Metrics server error: {}", e);
                    }
                }
            }
            trace!("Metrics server task finished.");
        }
    }
}
