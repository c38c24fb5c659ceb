//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vault_secrets_syncs_total` - Total number of sync cycles
//! - `vault_secrets_sync_errors_total` - Failed sync cycles by error kind
//! - `vault_secrets_sync_duration_seconds` - Duration of sync cycles
//! - `vault_secrets_backend_requests_total` - Vault requests by operation
//! - `vault_secrets_backend_request_duration_seconds` - Duration of Vault requests by operation
//! - `vault_secrets_lease_renewals_total` - Lease renewals by outcome
//! - `vault_secrets_writes_total` - Destination writes by result
//! - `vault_secrets_managed_specs` - Current number of VaultSecrets with a worker

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNCS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("vault_secrets_syncs_total", "Total number of sync cycles")
        .expect("Failed to create SYNCS_TOTAL metric - this should never happen")
});

static SYNC_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_secrets_sync_errors_total",
            "Total number of failed sync cycles by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SYNC_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_secrets_sync_duration_seconds",
            "Duration of sync cycles in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create SYNC_DURATION metric - this should never happen")
});

static BACKEND_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_secrets_backend_requests_total",
            "Total number of Vault requests by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create BACKEND_REQUESTS_TOTAL metric - this should never happen")
});

static BACKEND_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "vault_secrets_backend_request_duration_seconds",
            "Duration of Vault requests in seconds by operation",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"],
    )
    .expect("Failed to create BACKEND_REQUEST_DURATION metric - this should never happen")
});

static LEASE_RENEWALS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_secrets_lease_renewals_total",
            "Total number of lease renewals by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create LEASE_RENEWALS_TOTAL metric - this should never happen")
});

static WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_secrets_writes_total",
            "Total number of destination writes by result",
        ),
        &["result"],
    )
    .expect("Failed to create WRITES_TOTAL metric - this should never happen")
});

static MANAGED_SPECS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_secrets_managed_specs",
        "Current number of VaultSecrets with an active worker",
    )
    .expect("Failed to create MANAGED_SPECS metric - this should never happen")
});

/// Register all metrics with the registry
///
/// # Errors
/// Returns an error if a metric is registered twice
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNCS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(BACKEND_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(LEASE_RENEWALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANAGED_SPECS.clone()))?;
    Ok(())
}

pub fn increment_syncs() {
    SYNCS_TOTAL.inc();
}

pub fn increment_sync_errors(kind: &str) {
    SYNC_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_sync_duration(duration: f64) {
    SYNC_DURATION.observe(duration);
}

/// Record one Vault request and its duration
pub fn record_backend_request(operation: &str, duration: f64) {
    BACKEND_REQUESTS_TOTAL.with_label_values(&[operation]).inc();
    BACKEND_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_lease_renewals(outcome: &str) {
    LEASE_RENEWALS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_writes(result: &str) {
    WRITES_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_managed_specs(count: i64) {
    MANAGED_SPECS.set(count);
}
