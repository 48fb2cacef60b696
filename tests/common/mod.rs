//! Common test utilities
//!
//! In-memory collaborators for the reconcile flow and resource fixtures.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use connection_secret_controller::config::ControllerConfig;
use connection_secret_controller::controller::connsecret::Reconciler;
use connection_secret_controller::controller::index::{CacheKind, ResourceCache};
use connection_secret_controller::crd::{
    Condition, ConnectionStrings, DatabaseDeployment, DatabaseDeploymentSpec,
    DatabaseDeploymentStatus, DatabaseProject, DatabaseProjectSpec, DatabaseProjectStatus,
    DatabaseUser, DatabaseUserSpec, DatabaseUserStatus, ExternalProjectReference,
    LocalObjectReference, ResourceReference, ScopeType, UserScope,
};
use connection_secret_controller::provider::{
    CredentialError, CredentialReader, EventSink, ProjectDirectory, ProjectLookupError,
    SecretEvent, SecretStore, StoreError,
};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Once};
use zeroize::Zeroizing;

static RUSTLS_INIT: Once = Once::new();

/// Install the rustls crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Secret store with API-server-like semantics: resource versions,
/// `AlreadyExists` on create and `Conflict` on stale replace.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    next_version: Mutex<u64>,
    writes: Mutex<u32>,
    deletes: Mutex<u32>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, secret: &mut Secret) {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        secret.metadata.resource_version = Some(version.to_string());
    }

    /// Seed a secret without counting it as a write
    pub fn insert(&self, mut secret: Secret) {
        self.bump(&mut secret);
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.secrets.lock().unwrap().insert(key, secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.secrets
            .lock()
            .unwrap()
            .keys()
            .map(|(ns, name)| format!("{ns}/{name}"))
            .collect()
    }

    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }

    pub fn deletes(&self) -> u32 {
        *self.deletes.lock().unwrap()
    }

    /// Decoded value of one data key
    pub fn value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        self.secret(namespace, name)?
            .data?
            .get(key)
            .map(|v| String::from_utf8(v.0.clone()).unwrap())
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.secret(namespace, name))
    }

    async fn create(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        let key = (namespace.clone(), name.clone());
        if self.secrets.lock().unwrap().contains_key(&key) {
            return Err(StoreError::AlreadyExists { namespace, name });
        }
        let mut stored = secret.clone();
        self.bump(&mut stored);
        self.secrets.lock().unwrap().insert(key, stored.clone());
        *self.writes.lock().unwrap() += 1;
        Ok(stored)
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        let key = (namespace.clone(), name.clone());
        let current_version = self
            .secrets
            .lock()
            .unwrap()
            .get(&key)
            .and_then(|s| s.metadata.resource_version.clone());
        if current_version.is_none() || current_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict { namespace, name });
        }
        let mut stored = secret.clone();
        self.bump(&mut stored);
        self.secrets.lock().unwrap().insert(key, stored.clone());
        *self.writes.lock().unwrap() += 1;
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        let removed = self
            .secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        if removed {
            *self.deletes.lock().unwrap() += 1;
        }
        Ok(removed)
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, StoreError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns))
            .filter(|(_, s)| labels.iter().all(|(k, v)| s.labels().get(k) == Some(v)))
            .map(|(_, s)| s.clone())
            .collect())
    }
}

/// Passwords keyed by `DatabaseUser` object name
#[derive(Debug, Default)]
pub struct StaticCredentials {
    passwords: Mutex<HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn with(entries: &[(&str, &str)]) -> Self {
        Self {
            passwords: Mutex::new(
                entries
                    .iter()
                    .map(|(user, pw)| ((*user).to_string(), (*pw).to_string()))
                    .collect(),
            ),
        }
    }

    pub fn set(&self, user: &str, password: &str) {
        self.passwords
            .lock()
            .unwrap()
            .insert(user.to_string(), password.to_string());
    }
}

#[async_trait]
impl CredentialReader for StaticCredentials {
    async fn read_password(
        &self,
        user: &DatabaseUser,
    ) -> Result<Zeroizing<String>, CredentialError> {
        self.passwords
            .lock()
            .unwrap()
            .get(&user.name_any())
            .map(|pw| Zeroizing::new(pw.clone()))
            .ok_or_else(|| CredentialError::SecretNotFound {
                namespace: user.namespace().unwrap_or_default(),
                name: format!("{}-password", user.name_any()),
            })
    }
}

#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<SecretEvent>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.reason).collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.note.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(&self, event: SecretEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Project names keyed by project ID
#[derive(Debug, Default)]
pub struct StaticDirectory {
    names: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn with(entries: &[(&str, &str)]) -> Self {
        Self {
            names: entries
                .iter()
                .map(|(id, name)| ((*id).to_string(), (*name).to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl ProjectDirectory for StaticDirectory {
    async fn project_name(&self, project_id: &str) -> Result<Option<String>, ProjectLookupError> {
        Ok(self.names.get(project_id).cloned())
    }
}

/// Reconciler over in-memory collaborators with a synced cache
pub struct Harness {
    pub cache: Arc<ResourceCache>,
    pub store: Arc<InMemorySecretStore>,
    pub credentials: Arc<StaticCredentials>,
    pub events: Arc<RecordingEvents>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_directory(None)
    }

    pub fn with_directory(directory: Option<Arc<dyn ProjectDirectory>>) -> Self {
        let cache = Arc::new(ResourceCache::new());
        for kind in CacheKind::ALL {
            cache.mark_synced(kind);
        }
        let store = Arc::new(InMemorySecretStore::new());
        let credentials = Arc::new(StaticCredentials::default());
        let events = Arc::new(RecordingEvents::default());
        let mut reconciler = Reconciler::new(
            Arc::clone(&cache),
            Arc::clone(&store) as Arc<dyn SecretStore>,
            Arc::clone(&credentials) as Arc<dyn CredentialReader>,
            Arc::clone(&events) as Arc<dyn EventSink>,
            Arc::new(ControllerConfig::default()),
        );
        if let Some(directory) = directory {
            reconciler = reconciler.with_project_directory(directory);
        }
        Self {
            cache,
            store,
            credentials,
            events,
            reconciler,
        }
    }
}

pub const PROJECT_NS: &str = "infra";
pub const USER_NS: &str = "team-a";

/// Local project `P` with ID `pid1`
pub fn project(name: &str, display_name: &str, id: &str) -> DatabaseProject {
    let mut p = DatabaseProject::new(
        name,
        DatabaseProjectSpec {
            name: display_name.to_string(),
        },
    );
    p.metadata.namespace = Some(PROJECT_NS.to_string());
    p.status = Some(DatabaseProjectStatus {
        id: Some(id.to_string()),
        conditions: vec![Condition::ready()],
    });
    p
}

/// Ready deployment bound to the local project `project`
pub fn deployment(name: &str, cluster: &str, project: &str, standard: &str) -> DatabaseDeployment {
    let mut d = DatabaseDeployment::new(
        name,
        DatabaseDeploymentSpec {
            deployment_name: cluster.to_string(),
            project_ref: Some(ResourceReference {
                name: project.to_string(),
                namespace: Some(PROJECT_NS.to_string()),
            }),
            external_project_ref: None,
        },
    );
    d.metadata.namespace = Some(PROJECT_NS.to_string());
    d.metadata.generation = Some(1);
    d.status = Some(DatabaseDeploymentStatus {
        conditions: vec![Condition::ready()],
        connection_strings: Some(ConnectionStrings {
            standard: standard.to_string(),
            ..Default::default()
        }),
        observed_generation: Some(1),
    });
    d
}

/// Ready deployment referencing its project by external ID
pub fn external_deployment(name: &str, cluster: &str, project_id: &str) -> DatabaseDeployment {
    let mut d = deployment(name, cluster, "", &format!("mongodb://{cluster}.x/"));
    d.spec.project_ref = None;
    d.spec.external_project_ref = Some(ExternalProjectReference {
        id: project_id.to_string(),
    });
    d
}

/// Ready user bound to the local project `project`, in [`USER_NS`]
pub fn user(name: &str, username: &str, project: &str) -> DatabaseUser {
    let mut u = DatabaseUser::new(
        name,
        DatabaseUserSpec {
            username: username.to_string(),
            project_ref: Some(ResourceReference {
                name: project.to_string(),
                namespace: Some(PROJECT_NS.to_string()),
            }),
            external_project_ref: None,
            password_secret_ref: Some(LocalObjectReference {
                name: format!("{name}-password"),
            }),
            scopes: Vec::new(),
            delete_after_date: None,
        },
    );
    u.metadata.namespace = Some(USER_NS.to_string());
    u.metadata.uid = Some(format!("uid-{name}"));
    u.metadata.generation = Some(1);
    u.status = Some(DatabaseUserStatus {
        conditions: vec![Condition::ready()],
        username: Some(username.to_string()),
    });
    u
}

pub fn with_cluster_scopes(mut user: DatabaseUser, clusters: &[&str]) -> DatabaseUser {
    user.spec.scopes = clusters
        .iter()
        .map(|c| UserScope {
            name: (*c).to_string(),
            scope_type: ScopeType::Cluster,
        })
        .collect();
    user.metadata.generation = user.metadata.generation.map(|g| g + 1);
    user
}

pub fn not_ready_deployment(mut deployment: DatabaseDeployment) -> DatabaseDeployment {
    if let Some(status) = deployment.status.as_mut() {
        status.conditions = vec![Condition::new("Ready", false)];
    }
    deployment
}
