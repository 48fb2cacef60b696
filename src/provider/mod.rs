//! # Providers
//!
//! Collaborators the connection secret core talks to, behind traits so the
//! reconcile flow can be exercised without a cluster:
//!
//! - [`SecretStore`] reads and writes connection secrets
//! - [`CredentialReader`] reads a user's plaintext password
//! - [`EventSink`] publishes Kubernetes events
//! - [`ProjectDirectory`] resolves remote project IDs to display names

use crate::crd::DatabaseUser;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroizing;

pub mod directory;
pub mod kubernetes;

pub use directory::HttpProjectDirectory;
pub use kubernetes::{KubeCredentialReader, KubeSecretStore, RecorderEventSink};

/// Secret storage with optimistic concurrency.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fresh read; `None` when the secret does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Create; [`StoreError::AlreadyExists`] when another writer won the race
    async fn create(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace using the resource version carried by `secret`;
    /// [`StoreError::Conflict`] when it is stale
    async fn replace(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Delete; returns `false` when the secret was already absent
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, StoreError>;

    /// List secrets carrying all of `labels`, in one namespace or cluster-wide
    async fn list(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secret {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    #[error("secret {namespace}/{name} was modified concurrently")]
    Conflict { namespace: String, name: String },

    #[error("secret is missing metadata.{0}")]
    MissingMetadata(&'static str),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Reads the plaintext password of a user.
#[async_trait]
pub trait CredentialReader: Send + Sync {
    /// Password of `user`; empty when the user references no password secret
    async fn read_password(&self, user: &DatabaseUser)
        -> Result<Zeroizing<String>, CredentialError>;
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("password secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("password secret {namespace}/{name} has no {key:?} key")]
    MissingKey {
        namespace: String,
        name: String,
        key: &'static str,
    },

    #[error("password secret {namespace}/{name} holds an empty password")]
    EmptyPassword { namespace: String, name: String },

    #[error("password secret {namespace}/{name} is not valid UTF-8")]
    InvalidEncoding { namespace: String, name: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// A Kubernetes event about a connection secret or its owner
#[derive(Debug, Clone, PartialEq)]
pub struct SecretEvent {
    pub regarding: ObjectReference,
    pub severity: EventSeverity,
    pub reason: &'static str,
    pub action: &'static str,
    pub note: String,
}

/// Publishes events. Best effort: failures are logged by implementations.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: SecretEvent);
}

/// Resolves a remote project ID to its display name.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    /// `None` when the directory does not know the project
    async fn project_name(&self, project_id: &str) -> Result<Option<String>, ProjectLookupError>;
}

#[derive(Debug, Error)]
pub enum ProjectLookupError {
    #[error("project directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("project directory returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Reference to a secret for event publishing
#[must_use]
pub fn secret_reference(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Secret".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}
