//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatekeep_admission_total` (counter): admission decisions by `outcome`
//! - `gatekeep_tracked_clients` (gauge): clients currently held by the limiter
//! - `gatekeep_evicted_clients_total` (counter): clients removed by the sweep
//! - `gatekeep_auth_total` (counter): credential resolutions by `outcome`
//! - `gatekeep_background_tasks_total` (counter): background tasks by `event`
//! - `gatekeep_background_in_flight` (gauge): background tasks still running
//!
//! Recording is a no-op until a recorder is installed, so tests need no setup.

use std::net::SocketAddr;

use ::metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!("gatekeep_admission_total", "Admission decisions by outcome");
    describe_gauge!("gatekeep_tracked_clients", "Clients tracked by the rate limiter");
    describe_counter!(
        "gatekeep_evicted_clients_total",
        "Idle clients removed by the eviction sweep"
    );
    describe_counter!("gatekeep_auth_total", "Credential resolutions by outcome");
    describe_counter!(
        "gatekeep_background_tasks_total",
        "Background task lifecycle events"
    );
    describe_gauge!(
        "gatekeep_background_in_flight",
        "Background tasks currently running"
    );

    tracing::info!(address = %addr, "Metrics exporter started");
    Ok(())
}

pub fn record_admission(allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!("gatekeep_admission_total", "outcome" => outcome).increment(1);
}

pub fn record_tracked_clients(count: usize) {
    gauge!("gatekeep_tracked_clients").set(count as f64);
}

pub fn record_evicted_clients(count: usize) {
    counter!("gatekeep_evicted_clients_total").increment(count as u64);
}

pub fn record_auth(outcome: &'static str) {
    counter!("gatekeep_auth_total", "outcome" => outcome).increment(1);
}

pub fn record_background(event: &'static str) {
    counter!("gatekeep_background_tasks_total", "event" => event).increment(1);
}

pub fn record_background_in_flight(count: usize) {
    gauge!("gatekeep_background_in_flight").set(count as f64);
}
