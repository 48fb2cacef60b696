//! # Garbage Collector
//!
//! Every deletion of a connection secret goes through here. "Already absent"
//! is success everywhere.

use crate::constants::{
    LABEL_CLUSTER_NAME, LABEL_PROJECT_ID, LABEL_TYPE, LABEL_TYPE_CREDENTIAL,
};
use crate::controller::connsecret::identifiers::{decode_legacy, normalize_identifier};
use crate::observability::metrics;
use crate::provider::{
    secret_reference, EventSeverity, EventSink, SecretEvent, SecretStore, StoreError,
};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const REASON_DELETED: &str = "Deleted";
pub const REASON_ORPHAN_REAPED: &str = "OrphanReaped";

/// Why a connection secret is being removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionCause {
    DeploymentMissing,
    UserMissing,
    Expired,
    OutOfScope,
    Orphaned,
    UsernameChanged,
    ProjectRenamed,
}

impl DeletionCause {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeploymentMissing => "deployment-missing",
            Self::UserMissing => "user-missing",
            Self::Expired => "expired",
            Self::OutOfScope => "out-of-scope",
            Self::Orphaned => "orphaned",
            Self::UsernameChanged => "username-changed",
            Self::ProjectRenamed => "project-renamed",
        }
    }

    fn event_reason(self) -> &'static str {
        match self {
            Self::Orphaned => REASON_ORPHAN_REAPED,
            _ => REASON_DELETED,
        }
    }
}

/// Delete one connection secret. Returns `false` when it was already absent.
pub async fn delete_connection_secret(
    store: &dyn SecretStore,
    events: &dyn EventSink,
    namespace: &str,
    name: &str,
    cause: DeletionCause,
) -> Result<bool, StoreError> {
    let deleted = store.delete(namespace, name).await?;
    if !deleted {
        debug!(secret = name, cause = cause.as_str(), "Connection secret already absent");
        return Ok(false);
    }

    info!(
        resource.namespace = namespace,
        secret = name,
        cause = cause.as_str(),
        "Deleted connection secret"
    );
    metrics::increment_secrets_deleted(cause.as_str());
    events
        .publish(SecretEvent {
            regarding: secret_reference(namespace, name),
            severity: EventSeverity::Normal,
            reason: cause.event_reason(),
            action: "Delete",
            note: format!("Connection secret {name} deleted ({})", cause.as_str()),
        })
        .await;
    Ok(true)
}

/// Labels selecting every connection secret of a project
fn project_selector(project_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TYPE.to_string(), LABEL_TYPE_CREDENTIAL.to_string()),
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
    ])
}

/// Delete every connection secret of `project_id` whose cluster label is not
/// in `clusters` (the project's current deployment names). Returns the
/// deleted secrets as `namespace/name`.
///
/// `clusters` must come from a fully synced cache; an incomplete list would
/// delete live secrets.
pub async fn reap_orphans(
    store: &dyn SecretStore,
    events: &dyn EventSink,
    project_id: &str,
    clusters: &BTreeSet<String>,
) -> Result<Vec<String>, StoreError> {
    let authoritative: BTreeSet<String> =
        clusters.iter().map(|c| normalize_identifier(c)).collect();
    let secrets = store.list(None, &project_selector(project_id)).await?;

    let mut reaped = Vec::new();
    for secret in secrets {
        let Some(cluster) = secret.labels().get(LABEL_CLUSTER_NAME) else {
            continue;
        };
        if authoritative.contains(&normalize_identifier(cluster)) {
            continue;
        }
        if let Some(deleted) =
            delete_listed(store, events, &secret, DeletionCause::Orphaned).await?
        {
            reaped.push(deleted);
        }
    }

    if !reaped.is_empty() {
        metrics::increment_orphans_reaped(reaped.len());
        info!(
            project.id = project_id,
            "Reaped {} orphan connection secret(s): {}",
            reaped.len(),
            reaped.join(", ")
        );
    }
    Ok(reaped)
}

/// Delete connection secrets in `namespace` still named after a user's
/// previous username.
pub async fn reap_stale_usernames(
    store: &dyn SecretStore,
    events: &dyn EventSink,
    project_id: &str,
    namespace: &str,
    previous_username: &str,
) -> Result<Vec<String>, StoreError> {
    let previous = normalize_identifier(previous_username);
    let secrets = store
        .list(Some(namespace), &project_selector(project_id))
        .await?;

    let mut reaped = Vec::new();
    for secret in secrets {
        match decode_legacy(&secret) {
            Ok(ids) if ids.database_username == previous => {
                if let Some(deleted) =
                    delete_listed(store, events, &secret, DeletionCause::UsernameChanged).await?
                {
                    reaped.push(deleted);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping connection secret during username sweep: {}", e),
        }
    }
    Ok(reaped)
}

/// Delete connection secrets of `project_id` whose name carries a project
/// name other than `project_name`.
pub async fn reap_renamed_project(
    store: &dyn SecretStore,
    events: &dyn EventSink,
    project_id: &str,
    project_name: &str,
) -> Result<Vec<String>, StoreError> {
    let current = normalize_identifier(project_name);
    let secrets = store.list(None, &project_selector(project_id)).await?;

    let mut reaped = Vec::new();
    for secret in secrets {
        match decode_legacy(&secret) {
            Ok(ids) if ids.project_name.as_deref() != Some(current.as_str()) => {
                if let Some(deleted) =
                    delete_listed(store, events, &secret, DeletionCause::ProjectRenamed).await?
                {
                    reaped.push(deleted);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping connection secret during project rename sweep: {}", e),
        }
    }
    Ok(reaped)
}

async fn delete_listed(
    store: &dyn SecretStore,
    events: &dyn EventSink,
    secret: &Secret,
    cause: DeletionCause,
) -> Result<Option<String>, StoreError> {
    let namespace = secret.namespace().unwrap_or_default();
    let name = secret.name_any();
    let deleted = delete_connection_secret(store, events, &namespace, &name, cause).await?;
    Ok(deleted.then(|| format!("{namespace}/{name}")))
}
