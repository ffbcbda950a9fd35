//! Prometheus metrics for enrollment-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Token creations by outcome.
pub static TOKENS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "enrollment_tokens_created_total",
        "Total number of token creation attempts",
        &["status"] // ok, conflict, error
    )
    .expect("Failed to register tokens_created_total")
});

pub static TOKENS_REVOKED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "enrollment_tokens_revoked_total",
        "Total number of revoke requests",
        &["status"] // ok, not_found, error
    )
    .expect("Failed to register tokens_revoked_total")
});

pub static TOKENS_CLEANED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "enrollment_tokens_cleaned_total",
        "Total number of expired tokens removed by cleanup",
        &["trigger"]
    )
    .expect("Failed to register tokens_cleaned_total")
});

pub static PACKAGES_BUILT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "enrollment_packages_built_total",
        "Total number of package builds",
        &["status"]
    )
    .expect("Failed to register packages_built_total")
});

pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "enrollment_notifications_total",
        "Total number of enrollment notices by outcome",
        &["status"] // sent, failed, disabled
    )
    .expect("Failed to register notifications_total")
});

pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "enrollment_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Install the HTTP recorder and force registration of service metrics.
pub fn init_metrics() {
    if HTTP_METRICS_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = HTTP_METRICS_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "HTTP metrics recorder not installed"),
        }
    }

    Lazy::force(&TOKENS_CREATED_TOTAL);
    Lazy::force(&TOKENS_REVOKED_TOTAL);
    Lazy::force(&TOKENS_CLEANED_TOTAL);
    Lazy::force(&PACKAGES_BUILT_TOTAL);
    Lazy::force(&NOTIFICATIONS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = HTTP_METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    output.push_str(&encoder.encode_to_string(&metric_families).unwrap_or_default());
    output
}
