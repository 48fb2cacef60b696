//! # Upsert Engine
//!
//! Create-or-update of one connection secret against a fresh read. Writers
//! racing on the same name are serialized by the API server's optimistic
//! concurrency: a stale write fails with a conflict and the loop re-reads.

use crate::observability::metrics;
use crate::provider::{EventSeverity, EventSink, SecretEvent, SecretStore, StoreError};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{debug, info};

pub const REASON_ENSURED: &str = "ConnectionSecretsEnsured";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Created,
    Updated,
    /// Existing secret already matched; nothing was written
    Unchanged,
}

impl UpsertResult {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Make the stored secret match `desired`.
///
/// Each attempt starts from a fresh read. `AlreadyExists` on create and
/// `Conflict` on replace restart the loop; after `max_attempts` the last
/// error is returned.
pub async fn upsert_secret(
    store: &dyn SecretStore,
    desired: &Secret,
    max_attempts: u32,
) -> Result<UpsertResult, StoreError> {
    let namespace = desired
        .namespace()
        .ok_or(StoreError::MissingMetadata("namespace"))?;
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or(StoreError::MissingMetadata("name"))?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match store.get(&namespace, &name).await? {
            None => store.create(desired).await.map(|_| UpsertResult::Created),
            Some(current) if is_up_to_date(&current, desired) => {
                return Ok(UpsertResult::Unchanged);
            }
            Some(current) => store
                .replace(&merge_into(current, desired))
                .await
                .map(|_| UpsertResult::Updated),
        };

        match result {
            Err(e @ (StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }))
                if attempt < max_attempts =>
            {
                debug!(
                    "Upsert of {}/{} lost a race (attempt {}/{}): {}",
                    namespace, name, attempt, max_attempts, e
                );
            }
            other => return other,
        }
    }
}

/// Upsert and publish a summary event naming the secret when it was written.
pub async fn ensure_connection_secret(
    store: &dyn SecretStore,
    events: &dyn EventSink,
    desired: &Secret,
    regarding: ObjectReference,
    max_attempts: u32,
) -> Result<UpsertResult, StoreError> {
    let result = upsert_secret(store, desired, max_attempts).await?;
    let name = desired.name_any();
    metrics::increment_secrets_upserted(result.as_str());

    if result != UpsertResult::Unchanged {
        info!(
            secret = %name,
            result = result.as_str(),
            "Connection secret {}",
            result.as_str()
        );
        events
            .publish(SecretEvent {
                regarding,
                severity: EventSeverity::Normal,
                reason: REASON_ENSURED,
                action: "Upsert",
                note: format!("Connection Secrets were created/updated: {name}"),
            })
            .await;
    }
    Ok(result)
}

/// Data equal, desired labels present, desired owner present
fn is_up_to_date(current: &Secret, desired: &Secret) -> bool {
    let data_equal = current.data.clone().unwrap_or_default()
        == desired.data.clone().unwrap_or_default();
    let labels_present = desired
        .labels()
        .iter()
        .all(|(k, v)| current.labels().get(k) == Some(v));
    let owners_present = desired
        .owner_references()
        .iter()
        .all(|o| has_owner(current.owner_references(), o));
    data_equal && labels_present && owners_present
}

fn has_owner(owners: &[OwnerReference], owner: &OwnerReference) -> bool {
    owners.iter().any(|o| o.uid == owner.uid)
}

/// Desired data, labels and owner applied onto the freshly read secret;
/// its resource version and foreign labels are kept.
fn merge_into(mut current: Secret, desired: &Secret) -> Secret {
    current.data.clone_from(&desired.data);
    current.string_data = None;

    let labels = current.labels_mut();
    for (k, v) in desired.labels() {
        labels.insert(k.clone(), v.clone());
    }

    let missing: Vec<OwnerReference> = desired
        .owner_references()
        .iter()
        .filter(|o| !has_owner(current.owner_references(), o))
        .cloned()
        .collect();
    current.owner_references_mut().extend(missing);

    current
}
