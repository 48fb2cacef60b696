//! # Error Policy
//!
//! Maps reconcile results to a requeue decision and handles watch stream
//! errors.

use crate::controller::connsecret::{
    BackoffState, ConnectionSecretError, ReconcileOutcome, ReconcileRequest, Reconciler,
};
use crate::observability::metrics;
use kube_runtime::watcher;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the worker does with a request once its reconcile returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    Never,
}

/// Requeue decision for a finished reconcile
pub fn requeue_for(
    request: &ReconcileRequest,
    result: &Result<ReconcileOutcome, ConnectionSecretError>,
    ctx: &Reconciler,
) -> Requeue {
    match result {
        Ok(ReconcileOutcome::Waiting { blocking }) => {
            let delay = ctx.config.not_ready_requeue_duration();
            debug!(
                "Waiting on {} for {}, requeue in {}s",
                blocking.join(", "),
                request,
                delay.as_secs()
            );
            metrics::increment_requeues("not-ready");
            Requeue::After(delay)
        }
        Ok(_) => {
            reset_backoff(request, ctx);
            Requeue::Never
        }
        Err(e) => handle_reconciliation_error(request, e, ctx),
    }
}

/// Handle a reconcile error with per-request Fibonacci backoff.
///
/// Permanent errors are not requeued; the next watch event on either side of
/// the pair triggers a fresh attempt.
pub fn handle_reconciliation_error(
    request: &ReconcileRequest,
    error: &ConnectionSecretError,
    ctx: &Reconciler,
) -> Requeue {
    let error_span = tracing::error_span!(
        "controller.reconciliation_error",
        resource.namespace = %request.namespace,
        resource.name = %request.name,
        error = %error
    );
    let _error_guard = error_span.enter();

    metrics::increment_reconciliation_errors(error.kind());

    if error.is_permanent() {
        error!("Reconciliation of {} failed permanently: {}", request, error);
        reset_backoff(request, ctx);
        return Requeue::Never;
    }

    let key = request.to_string();
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key).or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_secs, ctx.config.backoff_max_secs)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using maximum backoff", e);
            (ctx.config.backoff_max_secs, 0)
        }
    };

    warn!(
        "Reconciliation of {} failed: {} (retry in {}s, error count: {})",
        request, error, backoff_seconds, error_count
    );
    metrics::increment_requeues("error-backoff");
    Requeue::After(Duration::from_secs(backoff_seconds))
}

fn reset_backoff(request: &ReconcileRequest, ctx: &Reconciler) {
    if let Ok(mut states) = ctx.backoff_states.lock() {
        states.remove(&request.to_string());
    }
}

/// Log a watch stream error. The stream itself keeps running behind the
/// watcher's default backoff.
pub fn handle_watch_stream_error(kind: &str, error: &watcher::Error) {
    let error_string = error.to_string();
    let is_not_found = error_string.contains("404") || error_string.contains("not found");
    let is_forbidden = error_string.contains("403") || error_string.contains("Forbidden");
    let is_410 = error_string.contains("410") || error_string.contains("too old resource version");

    metrics::increment_watch_restarts(kind);
    if is_not_found {
        error!(
            watch.kind = kind,
            "Watch failed, is the CRD installed? {}", error_string
        );
    } else if is_forbidden {
        error!(
            watch.kind = kind,
            "Watch forbidden, check the controller's RBAC: {}", error_string
        );
    } else if is_410 {
        info!(watch.kind = kind, "Watch resource version expired, relisting");
    } else {
        warn!(watch.kind = kind, "Watch error: {}", error_string);
    }
}
