//! Metrics collection and Prometheus export.
//!
//! Initializes the metrics exporter and provides the recording helpers used
//! by the registry, the validation engine and the logout coordinator.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder.
///
/// Must be called once at startup before any metrics are recorded. Calling
/// it again is an error rather than a second recorder.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Err(anyhow::anyhow!("metrics recorder already initialized"));
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("failed to set metrics handle: already initialized"))
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

pub fn record_ticket_issued(kind: &'static str) {
    counter!("sso_tickets_issued_total", "kind" => kind).increment(1);
}

/// `outcome` is `success` or a `TicketError` code.
pub fn record_ticket_validation(outcome: &'static str) {
    counter!("sso_ticket_validations_total", "outcome" => outcome).increment(1);
}

pub fn record_tickets_swept(count: usize) {
    counter!("sso_tickets_swept_total").increment(count as u64);
}

pub fn set_registry_size(size: usize) {
    gauge!("sso_registry_tickets").set(size as f64);
}

pub fn record_logout_invalidation(outcome: &'static str) {
    counter!("sso_logout_invalidations_total", "outcome" => outcome).increment(1);
}
