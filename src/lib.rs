/// OnDemand Exporter - Prometheus metrics for Open OnDemand portal hosts
///
/// This library provides the scrape cycle and its collectors: active
/// sessions, the processes they own, Apache proxy connections and Passenger
/// application load.
pub mod apache;
pub mod cli;
pub mod command;
pub mod config;
pub mod core;
pub mod internal_metrics;
pub mod passenger;
pub mod process;
pub mod scrape;
pub mod sessions;

// Re-export core types for convenience
pub use core::*;
