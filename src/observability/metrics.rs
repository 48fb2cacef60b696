//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `connection_secret_reconciliations_total` - Reconciliations by outcome
//! - `connection_secret_reconciliation_errors_total` - Reconciliation errors by kind
//! - `connection_secret_reconciliation_duration_seconds` - Duration of reconciliations
//! - `connection_secret_secrets_upserted_total` - Upserts by result (created/updated/unchanged)
//! - `connection_secret_secrets_deleted_total` - Deletions by cause
//! - `connection_secret_orphans_reaped_total` - Secrets removed by orphan sweeps
//! - `connection_secret_requests_enqueued_total` - Reconcile requests by watch source
//! - `connection_secret_requeues_total` - Delayed requeues by reason
//! - `connection_secret_watch_restarts_total` - Watch streams restarted after an error
//! - `connection_secret_project_lookup_duration_seconds` - Project directory lookups
//! - `connection_secret_project_lookup_errors_total` - Failed project directory lookups

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_reconciliations_total",
            "Total number of reconciliations by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_reconciliation_errors_total",
            "Total number of reconciliation errors by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "connection_secret_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRETS_UPSERTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_secrets_upserted_total",
            "Total number of connection secret upserts by result",
        ),
        &["result"],
    )
    .expect("Failed to create SECRETS_UPSERTED_TOTAL metric - this should never happen")
});

static SECRETS_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_secrets_deleted_total",
            "Total number of connection secrets deleted by cause",
        ),
        &["cause"],
    )
    .expect("Failed to create SECRETS_DELETED_TOTAL metric - this should never happen")
});

static ORPHANS_REAPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "connection_secret_orphans_reaped_total",
        "Total number of orphan connection secrets removed by sweeps",
    )
    .expect("Failed to create ORPHANS_REAPED_TOTAL metric - this should never happen")
});

static REQUESTS_ENQUEUED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_requests_enqueued_total",
            "Total number of reconcile requests enqueued by watch source",
        ),
        &["source"],
    )
    .expect("Failed to create REQUESTS_ENQUEUED_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_requeues_total",
            "Total number of delayed requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "connection_secret_watch_restarts_total",
            "Total number of watch stream restarts by watched kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static PROJECT_LOOKUP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "connection_secret_project_lookup_duration_seconds",
            "Duration of project directory lookups in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create PROJECT_LOOKUP_DURATION metric - this should never happen")
});

static PROJECT_LOOKUP_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "connection_secret_project_lookup_errors_total",
        "Total number of failed project directory lookups",
    )
    .expect("Failed to create PROJECT_LOOKUP_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRETS_UPSERTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ORPHANS_REAPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_ENQUEUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROJECT_LOOKUP_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROJECT_LOOKUP_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(outcome: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_secrets_upserted(result: &str) {
    SECRETS_UPSERTED_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_secrets_deleted(cause: &str) {
    SECRETS_DELETED_TOTAL.with_label_values(&[cause]).inc();
}

pub fn increment_orphans_reaped(count: usize) {
    ORPHANS_REAPED_TOTAL.inc_by(count as u64);
}

pub fn increment_requests_enqueued(source: &str) {
    REQUESTS_ENQUEUED_TOTAL.with_label_values(&[source]).inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_watch_restarts(kind: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_project_lookup_duration(duration: f64) {
    PROJECT_LOOKUP_DURATION.observe(duration);
}

pub fn increment_project_lookup_errors() {
    PROJECT_LOOKUP_ERRORS_TOTAL.inc();
}
