//! # Kubernetes Providers
//!
//! [`SecretStore`], [`CredentialReader`] and [`EventSink`] backed by the
//! Kubernetes API.

use crate::constants::{CONTROLLER_NAME, PASSWORD_SECRET_KEY};
use crate::crd::DatabaseUser;
use crate::provider::{
    CredentialError, CredentialReader, EventSeverity, EventSink, SecretEvent, SecretStore,
    StoreError,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Secret store over `Api<Secret>`
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_and_name(secret: &Secret) -> Result<(String, String), StoreError> {
    let namespace = secret
        .namespace()
        .ok_or(StoreError::MissingMetadata("namespace"))?;
    let name = secret
        .metadata
        .name
        .clone()
        .ok_or(StoreError::MissingMetadata("name"))?;
    Ok((namespace, name))
}

/// `k=v,k2=v2` label selector
pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = namespace_and_name(secret)?;
        match self
            .api(&namespace)
            .create(&PostParams::default(), secret)
            .await
        {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(StoreError::AlreadyExists { namespace, name })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = namespace_and_name(secret)?;
        match self
            .api(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
        {
            Ok(replaced) => Ok(replaced),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(StoreError::Conflict { namespace, name })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Secret {}/{} already absent", namespace, name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, StoreError> {
        let api: Api<Secret> = match namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&params).await?.items)
    }
}

/// Reads passwords from the secret referenced by `spec.passwordSecretRef`
#[derive(Clone)]
pub struct KubeCredentialReader {
    client: Client,
}

impl std::fmt::Debug for KubeCredentialReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCredentialReader").finish_non_exhaustive()
    }
}

impl KubeCredentialReader {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialReader for KubeCredentialReader {
    async fn read_password(
        &self,
        user: &DatabaseUser,
    ) -> Result<Zeroizing<String>, CredentialError> {
        let Some(reference) = user.spec.password_secret_ref.as_ref() else {
            return Ok(Zeroizing::new(String::new()));
        };
        let namespace = user.namespace().unwrap_or_default();
        let name = reference.name.clone();

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let Some(mut secret) = secrets.get_opt(&name).await? else {
            return Err(CredentialError::SecretNotFound { namespace, name });
        };

        let Some(bytes) = secret
            .data
            .as_mut()
            .and_then(|data| data.remove(PASSWORD_SECRET_KEY))
        else {
            return Err(CredentialError::MissingKey {
                namespace,
                name,
                key: PASSWORD_SECRET_KEY,
            });
        };

        let password = match String::from_utf8(bytes.0) {
            Ok(password) => Zeroizing::new(password),
            Err(e) => {
                drop(Zeroizing::new(e.into_bytes()));
                return Err(CredentialError::InvalidEncoding { namespace, name });
            }
        };
        if password.is_empty() {
            return Err(CredentialError::EmptyPassword { namespace, name });
        }
        Ok(password)
    }
}

/// Event sink publishing through `kube::runtime::events::Recorder`
pub struct RecorderEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for RecorderEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderEventSink").finish_non_exhaustive()
    }
}

impl RecorderEventSink {
    /// `instance` is typically the pod name
    #[must_use]
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for RecorderEventSink {
    async fn publish(&self, event: SecretEvent) {
        let type_ = match event.severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        let ev = Event {
            type_,
            reason: event.reason.to_string(),
            note: Some(event.note),
            action: event.action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&ev, &event.regarding).await {
            warn!(
                reason = event.reason,
                "Failed to publish event for {:?}: {}",
                event.regarding.name,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_is_sorted_and_comma_joined() {
        let labels = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "a=1,b=2");
    }
}
