//! Metrics collection and exposition.
//!
//! # Metrics
//! - `grid_transactions_total` (counter): transactions by method, outcome
//! - `grid_confirmation_seconds` (histogram): submit-to-receipt latency
//! - `grid_claims_total` (counter): validation claims by terminal outcome
//! - `grid_claims_in_flight` (gauge): claims currently being processed
//! - `grid_ledger_health` (gauge): 1=reachable, 0=unreachable

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_transaction(method: &str, outcome: &'static str) {
    counter!("grid_transactions_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_confirmation_latency(elapsed: Duration) {
    histogram!("grid_confirmation_seconds").record(elapsed.as_secs_f64());
}

pub fn record_claim_outcome(outcome: &'static str) {
    counter!("grid_claims_total", "outcome" => outcome).increment(1);
}

pub fn record_claims_in_flight(count: usize) {
    gauge!("grid_claims_in_flight").set(count as f64);
}

pub fn record_ledger_health(healthy: bool) {
    gauge!("grid_ledger_health").set(if healthy { 1.0 } else { 0.0 });
}
