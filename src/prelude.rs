//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use connection_secret_controller::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::provider::{
    CredentialReader, EventSink, ProjectDirectory, SecretEvent, SecretStore, StoreError,
};

pub use crate::controller::connsecret::{
    ConnectionSecretError, DeletionCause, ReconcileOutcome, ReconcileRequest, Reconciler,
    RequestName, ResourceIdentifierSet, UpsertResult, WatchRegistry,
};
pub use crate::controller::index::ResourceCache;

pub use crate::config::{ControllerConfig, ServerConfig};
