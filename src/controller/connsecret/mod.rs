//! # Connection Secrets
//!
//! Derives one Kubernetes secret per (deployment, user) pair and keeps it in
//! sync with both sides.

pub mod data;
pub mod fanout;
pub mod gc;
pub mod identifiers;
pub mod pair;
pub mod reconcile;
pub mod upsert;
pub mod validity;

pub use fanout::WatchRegistry;
pub use gc::DeletionCause;
pub use identifiers::{ReconcileRequest, RequestName, ResourceIdentifierSet};
pub use reconcile::{BackoffState, ConnectionSecretError, ReconcileOutcome, Reconciler};
pub use upsert::UpsertResult;
