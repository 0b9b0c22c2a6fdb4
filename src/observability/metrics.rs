//! # Metrics
//!
//! Prometheus metrics for monitoring the extension.
//!
//! ## Metrics Exposed
//!
//! - `audit_extension_operations_total` - Actuator operations by type
//! - `audit_extension_operation_errors_total` - Failed actuator operations by error kind
//! - `audit_extension_operation_duration_seconds` - Duration of actuator operations
//! - `audit_extension_credentials_generated_total` - Certificates and authorities generated
//! - `audit_extension_credentials_reused_total` - Persisted credentials reused unchanged
//! - `audit_extension_managed_resources_applied_total` - Managed resource slots written
//! - `audit_extension_managed_resources_deleted_total` - Managed resource slots removed
//! - `audit_extension_delete_timeouts_total` - Deletions that gave up waiting

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "audit_extension_operations_total",
            "Total number of actuator operations",
        ),
        &["operation"],
    )
    .expect("Failed to create OPERATIONS_TOTAL metric - this should never happen")
});

static OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "audit_extension_operation_errors_total",
            "Total number of failed actuator operations",
        ),
        &["operation", "kind"],
    )
    .expect("Failed to create OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "audit_extension_operation_duration_seconds",
            "Duration of actuator operations in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
        &["operation"],
    )
    .expect("Failed to create OPERATION_DURATION metric - this should never happen")
});

static CREDENTIALS_GENERATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "audit_extension_credentials_generated_total",
        "Total number of certificates and authorities generated",
    )
    .expect("Failed to create CREDENTIALS_GENERATED_TOTAL metric - this should never happen")
});

static CREDENTIALS_REUSED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "audit_extension_credentials_reused_total",
        "Total number of persisted credentials reused without regeneration",
    )
    .expect("Failed to create CREDENTIALS_REUSED_TOTAL metric - this should never happen")
});

static MANAGED_RESOURCES_APPLIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "audit_extension_managed_resources_applied_total",
        "Total number of managed resource slots written",
    )
    .expect("Failed to create MANAGED_RESOURCES_APPLIED_TOTAL metric - this should never happen")
});

static MANAGED_RESOURCES_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "audit_extension_managed_resources_deleted_total",
        "Total number of managed resource slots removed",
    )
    .expect("Failed to create MANAGED_RESOURCES_DELETED_TOTAL metric - this should never happen")
});

static DELETE_TIMEOUTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "audit_extension_delete_timeouts_total",
        "Total number of deletions that timed out waiting for removal",
    )
    .expect("Failed to create DELETE_TIMEOUTS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_GENERATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_REUSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANAGED_RESOURCES_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANAGED_RESOURCES_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELETE_TIMEOUTS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_operations(operation: &str) {
    OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_operation_errors(operation: &str, kind: &str) {
    OPERATION_ERRORS_TOTAL
        .with_label_values(&[operation, kind])
        .inc();
}

pub fn observe_operation_duration(operation: &str, duration: f64) {
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_credentials_generated_total() {
    CREDENTIALS_GENERATED_TOTAL.inc();
}

pub fn increment_credentials_reused_total() {
    CREDENTIALS_REUSED_TOTAL.inc();
}

pub fn increment_managed_resources_applied_total() {
    MANAGED_RESOURCES_APPLIED_TOTAL.inc();
}

pub fn increment_managed_resources_deleted_total() {
    MANAGED_RESOURCES_DELETED_TOTAL.inc();
}

pub fn increment_delete_timeouts_total() {
    DELETE_TIMEOUTS_TOTAL.inc();
}
