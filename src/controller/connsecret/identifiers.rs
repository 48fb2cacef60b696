//! # Identifier Codec
//!
//! Reconcile requests carry a `namespace/name` pair. The name comes in one of
//! two encodings:
//!
//! - **internal**: `projectID$cluster$username`, produced by the watch fan-out
//! - **legacy**: the name of an existing connection secret, produced by the
//!   secret watch; identifiers are recovered from the secret's labels
//!
//! [`RequestName::classify`] decides the encoding once, at the boundary.

use crate::constants::{LABEL_CLUSTER_NAME, LABEL_PROJECT_ID};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::fmt;
use thiserror::Error;

/// Reserved separator of the internal encoding
pub const INTERNAL_SEPARATOR: char = '$';

/// The routing key of one connection secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifierSet {
    pub project_id: String,
    /// Known only when recovered from an existing secret
    pub project_name: Option<String>,
    /// Normalized cluster (deployment) name
    pub cluster_name: String,
    /// Normalized database username
    pub database_username: String,
}

impl ResourceIdentifierSet {
    /// Identifiers for a pair about to be reconciled; names are normalized here.
    #[must_use]
    pub fn new(project_id: &str, cluster_name: &str, database_username: &str) -> Self {
        Self {
            project_id: project_id.trim().to_string(),
            project_name: None,
            cluster_name: normalize_identifier(cluster_name),
            database_username: normalize_identifier(database_username),
        }
    }

    /// Internal encoding of these identifiers
    #[must_use]
    pub fn internal_name(&self) -> String {
        internal_format(&self.project_id, &self.cluster_name, &self.database_username)
    }
}

/// One unit of reconcile work. Namespace is the user's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Request for a pair in internal encoding
    #[must_use]
    pub fn for_pair(namespace: &str, ids: &ResourceIdentifierSet) -> Self {
        Self::new(namespace, ids.internal_name())
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Encoding of a request name, decided once when a request is picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestName {
    /// Fully decoded internal encoding
    Internal(ResourceIdentifierSet),
    /// Name of an existing secret; identifiers live in its labels
    Legacy { secret_name: String },
}

impl RequestName {
    /// Classify a request name. Any name containing the separator is internal
    /// and must decode cleanly.
    pub fn classify(name: &str) -> Result<Self, IdentifierError> {
        if name.contains(INTERNAL_SEPARATOR) {
            decode_internal(name).map(Self::Internal)
        } else {
            Ok(Self::Legacy {
                secret_name: name.to_string(),
            })
        }
    }
}

/// Decoding failures. All of them are permanent: a malformed name never heals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("internal name {name:?} must have exactly 3 parts separated by '$', found {found}")]
    WrongSegmentCount { name: String, found: usize },

    #[error("internal name {name:?} has an empty part")]
    EmptySegment { name: String },

    #[error("secret {name:?} is missing label(s) {}", .missing.join(", "))]
    MissingLabels {
        name: String,
        missing: Vec<&'static str>,
    },

    #[error("secret {name:?} has an empty {label} label")]
    EmptyLabel { name: String, label: &'static str },

    #[error("secret name {name:?} does not contain the cluster infix {infix:?}")]
    MissingInfix { name: String, infix: String },

    #[error("secret name {name:?} contains the cluster infix {infix:?} more than once")]
    DuplicatedInfix { name: String, infix: String },

    #[error("secret name {name:?} has an empty project or username part")]
    EmptyNameSegment { name: String },
}

/// Kubernetes-safe form of a display name: trimmed, lowercased, and every
/// character outside `[a-z0-9.-]` replaced with `-`.
#[must_use]
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Internal encoding `projectID$cluster$username`.
#[must_use]
pub fn internal_format(project_id: &str, cluster_name: &str, username: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        project_id.trim(),
        normalize_identifier(cluster_name),
        normalize_identifier(username),
        sep = INTERNAL_SEPARATOR
    )
}

/// Secret name `project-cluster-username`, all parts normalized.
#[must_use]
pub fn k8s_format(project_name: &str, cluster_name: &str, username: &str) -> String {
    format!(
        "{}-{}-{}",
        normalize_identifier(project_name),
        normalize_identifier(cluster_name),
        normalize_identifier(username)
    )
}

/// Decode the internal encoding.
pub fn decode_internal(name: &str) -> Result<ResourceIdentifierSet, IdentifierError> {
    let parts: Vec<&str> = name.split(INTERNAL_SEPARATOR).collect();
    let [project_id, cluster_name, username] = parts.as_slice() else {
        return Err(IdentifierError::WrongSegmentCount {
            name: name.to_string(),
            found: parts.len(),
        });
    };
    if [project_id, cluster_name, username]
        .iter()
        .any(|p| p.trim().is_empty())
    {
        return Err(IdentifierError::EmptySegment {
            name: name.to_string(),
        });
    }

    Ok(ResourceIdentifierSet {
        project_id: (*project_id).to_string(),
        project_name: None,
        cluster_name: (*cluster_name).to_string(),
        database_username: (*username).to_string(),
    })
}

/// Recover identifiers from an existing connection secret.
///
/// Project ID and cluster come from labels; project name and username are
/// the parts of the secret name around `-<cluster>-`.
pub fn decode_legacy(secret: &Secret) -> Result<ResourceIdentifierSet, IdentifierError> {
    let name = secret.name_any();
    let labels = secret.labels();

    let missing: Vec<&'static str> = [LABEL_PROJECT_ID, LABEL_CLUSTER_NAME]
        .into_iter()
        .filter(|key| !labels.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(IdentifierError::MissingLabels { name, missing });
    }

    let label = |key: &'static str| -> Result<String, IdentifierError> {
        labels
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IdentifierError::EmptyLabel {
                name: name.clone(),
                label: key,
            })
    };
    let project_id = label(LABEL_PROJECT_ID)?;
    let cluster_name = label(LABEL_CLUSTER_NAME)?;

    let (project_name, username) = split_on_cluster(&name, &cluster_name)?;

    Ok(ResourceIdentifierSet {
        project_id,
        project_name: Some(project_name.to_string()),
        cluster_name,
        database_username: username.to_string(),
    })
}

/// Split `project-cluster-user` on the exact `-cluster-` infix.
fn split_on_cluster<'a>(
    name: &'a str,
    cluster_name: &str,
) -> Result<(&'a str, &'a str), IdentifierError> {
    let infix = format!("-{cluster_name}-");
    let Some(start) = name.find(&infix) else {
        return Err(IdentifierError::MissingInfix {
            name: name.to_string(),
            infix,
        });
    };
    // Occurrences may share a dash (`p-a-a-u` with cluster `a`)
    if name[start + 1..].contains(&infix) {
        return Err(IdentifierError::DuplicatedInfix {
            name: name.to_string(),
            infix,
        });
    }

    let project = &name[..start];
    let username = &name[start + infix.len()..];
    if project.is_empty() || username.is_empty() {
        return Err(IdentifierError::EmptyNameSegment {
            name: name.to_string(),
        });
    }
    Ok((project, username))
}
