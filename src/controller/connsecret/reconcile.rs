//! # Reconcile
//!
//! One reconcile request runs as a single unit:
//!
//! 1. decode identifiers (internal name, or labels of an existing secret)
//! 2. resolve the deployment/user pair
//! 3. evaluate the validity gate
//! 4. delete, wait, or build and upsert the secret
//!
//! Nothing is checkpointed; a failed request is retried from step 1.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::connsecret::data::{
    connection_labels, desired_secret, read_connection_data, ConnectionStringError,
};
use crate::controller::connsecret::gc::{
    delete_connection_secret, reap_orphans, reap_renamed_project, reap_stale_usernames,
    DeletionCause,
};
use crate::controller::connsecret::identifiers::{
    decode_legacy, k8s_format, normalize_identifier, IdentifierError, ReconcileRequest,
    RequestName, ResourceIdentifierSet,
};
use crate::controller::connsecret::pair::{
    resolve_pair, AmbiguityError, PairResolution, ResourcePair,
};
use crate::controller::connsecret::upsert::{ensure_connection_secret, UpsertResult};
use crate::controller::connsecret::validity::{evaluate, ValidityError, Verdict};
use crate::controller::index::ResourceCache;
use crate::crd::{DatabaseDeployment, DatabaseUser, ProjectBinding};
use crate::provider::{
    CredentialError, CredentialReader, EventSink, ProjectDirectory, ProjectLookupError,
    SecretStore, StoreError,
};
use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, Instrument};

/// Terminal, non-error results of a reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Upserted {
        secret: String,
        result: UpsertResult,
    },
    Deleted {
        secret: String,
        cause: DeletionCause,
    },
    AlreadyAbsent {
        secret: String,
        cause: DeletionCause,
    },
    /// Nothing exists for this key, or the secret behind a legacy name is gone
    Ignored,
    /// The listed objects are not ready; requeued, not a failure
    Waiting { blocking: Vec<String> },
}

/// Secret a request acts on
enum TargetName {
    Current(String),
    /// Legacy secret named after the project's previous display name
    Renamed(String),
}

impl TargetName {
    fn into_name(self) -> String {
        match self {
            Self::Current(name) | Self::Renamed(name) => name,
        }
    }
}

impl ReconcileOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upserted { .. } => "upserted",
            Self::Deleted { .. } => "deleted",
            Self::AlreadyAbsent { .. } => "already-absent",
            Self::Ignored => "ignored",
            Self::Waiting { .. } => "waiting",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionSecretError {
    #[error("invalid connection secret name: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("ambiguous connection resources: {0}")]
    Ambiguous(#[from] AmbiguityError),

    #[error(transparent)]
    Validity(#[from] ValidityError),

    #[error("invalid connection string: {0}")]
    Connection(#[from] ConnectionStringError),

    #[error("failed to read user password: {0}")]
    CredentialRead(#[from] CredentialError),

    #[error("cannot resolve the name of project {project_id}")]
    ProjectNameUnresolved { project_id: String },

    #[error("project lookup failed: {0}")]
    ProjectLookup(#[from] ProjectLookupError),

    #[error("secret store error: {0}")]
    Store(#[from] StoreError),
}

impl ConnectionSecretError {
    /// Permanent errors are not retried; they need an upstream change,
    /// which arrives as a new watch event.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Identifier(_) | Self::Ambiguous(_) | Self::Validity(_) | Self::Connection(_)
        )
    }

    /// Metric label
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identifier(_) => "invalid-name",
            Self::Ambiguous(_) => "ambiguous",
            Self::Validity(_) => "invalid-expiration",
            Self::Connection(_) => "invalid-connection-string",
            Self::CredentialRead(_) => "credential-read",
            Self::ProjectNameUnresolved { .. } => "project-name-unresolved",
            Self::ProjectLookup(_) => "project-lookup",
            Self::Store(_) => "store",
        }
    }
}

/// Backoff state for a specific request
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciler context shared by all workers
pub struct Reconciler {
    pub cache: Arc<ResourceCache>,
    pub store: Arc<dyn SecretStore>,
    pub credentials: Arc<dyn CredentialReader>,
    pub events: Arc<dyn EventSink>,
    pub directory: Option<Arc<dyn ProjectDirectory>>,
    pub config: Arc<ControllerConfig>,
    /// Per-request backoff, keyed by `namespace/name`
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache_synced", &self.cache.is_synced())
            .field("project_directory", &self.directory.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        cache: Arc<ResourceCache>,
        store: Arc<dyn SecretStore>,
        credentials: Arc<dyn CredentialReader>,
        events: Arc<dyn EventSink>,
        config: Arc<ControllerConfig>,
    ) -> Self {
        Self {
            cache,
            store,
            credentials,
            events,
            directory: None,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_project_directory(mut self, directory: Arc<dyn ProjectDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub async fn reconcile(
        &self,
        request: &ReconcileRequest,
    ) -> Result<ReconcileOutcome, ConnectionSecretError> {
        self.reconcile_at(request, Utc::now()).await
    }

    /// Reconcile with an explicit "now" for the expiration check
    pub async fn reconcile_at(
        &self,
        request: &ReconcileRequest,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ConnectionSecretError> {
        let span = tracing::info_span!(
            "connection_secret.reconcile",
            resource.namespace = %request.namespace,
            resource.name = %request.name,
        );
        async move {
            let Some(ids) = self.load_identifiers(request).await? else {
                debug!("Connection secret behind {} no longer exists", request);
                return Ok(ReconcileOutcome::Ignored);
            };

            match resolve_pair(&self.cache, &ids, &request.namespace)? {
                PairResolution::NothingToDo => Ok(ReconcileOutcome::Ignored),
                PairResolution::DeploymentMissing { user } => {
                    let target = self.target_name(&ids, None, user.as_ref()).await?;
                    self.delete(request, target.into_name(), DeletionCause::DeploymentMissing)
                        .await
                }
                PairResolution::UserMissing { deployment } => {
                    let target = self.target_name(&ids, deployment.as_ref(), None).await?;
                    self.delete(request, target.into_name(), DeletionCause::UserMissing)
                        .await
                }
                PairResolution::Resolved(pair) => {
                    let removal = match evaluate(&pair, now)? {
                        Verdict::Valid => None,
                        Verdict::NotReady { blocking } => {
                            info!("Not ready: {}", blocking.join(", "));
                            return Ok(ReconcileOutcome::Waiting { blocking });
                        }
                        Verdict::Expired { .. } => Some(DeletionCause::Expired),
                        Verdict::OutOfScope { .. } => Some(DeletionCause::OutOfScope),
                    };

                    let target = self
                        .target_name(&ids, Some(&pair.deployment), Some(&pair.user))
                        .await?;
                    let name = match target {
                        TargetName::Current(name) => name,
                        TargetName::Renamed(stale) => {
                            info!(
                                project.id = %pair.project_id,
                                "Project renamed, removing {}",
                                stale
                            );
                            return self
                                .delete(request, stale, DeletionCause::ProjectRenamed)
                                .await;
                        }
                    };
                    match removal {
                        None => self.upsert(request, &ids, &pair, name).await,
                        Some(cause) => self.delete(request, name, cause).await,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn load_identifiers(
        &self,
        request: &ReconcileRequest,
    ) -> Result<Option<ResourceIdentifierSet>, ConnectionSecretError> {
        match RequestName::classify(&request.name)? {
            RequestName::Internal(ids) => Ok(Some(ids)),
            RequestName::Legacy { secret_name } => {
                match self.store.get(&request.namespace, &secret_name).await? {
                    Some(secret) => Ok(Some(decode_legacy(&secret)?)),
                    None => Ok(None),
                }
            }
        }
    }

    async fn upsert(
        &self,
        request: &ReconcileRequest,
        ids: &ResourceIdentifierSet,
        pair: &ResourcePair,
        name: String,
    ) -> Result<ReconcileOutcome, ConnectionSecretError> {
        let data = read_connection_data(pair, self.credentials.as_ref())
            .await?
            .to_secret_data()?;
        let desired = desired_secret(
            &request.namespace,
            &name,
            connection_labels(&pair.project_id, &ids.cluster_name),
            data,
            pair.user.controller_owner_ref(&()).map(|mut owner| {
                // Other controllers may own the secret
                owner.controller = None;
                owner
            }),
        );

        let result = ensure_connection_secret(
            self.store.as_ref(),
            self.events.as_ref(),
            &desired,
            pair.user.object_ref(&()),
            self.config.upsert_max_attempts,
        )
        .await?;
        Ok(ReconcileOutcome::Upserted {
            secret: name,
            result,
        })
    }

    async fn delete(
        &self,
        request: &ReconcileRequest,
        name: String,
        cause: DeletionCause,
    ) -> Result<ReconcileOutcome, ConnectionSecretError> {
        let deleted = delete_connection_secret(
            self.store.as_ref(),
            self.events.as_ref(),
            &request.namespace,
            &name,
            cause,
        )
        .await?;
        Ok(if deleted {
            ReconcileOutcome::Deleted {
                secret: name,
                cause,
            }
        } else {
            ReconcileOutcome::AlreadyAbsent {
                secret: name,
                cause,
            }
        })
    }

    /// Secret name for the request. The project's current name wins over the
    /// one decoded from a legacy secret name; when they differ, the legacy
    /// secret predates a project rename.
    async fn target_name(
        &self,
        ids: &ResourceIdentifierSet,
        deployment: Option<&DatabaseDeployment>,
        user: Option<&DatabaseUser>,
    ) -> Result<TargetName, ConnectionSecretError> {
        let current = self
            .current_project_name(&ids.project_id, deployment, user)
            .await?;
        let project_name = match (current, &ids.project_name) {
            (Some(current), Some(legacy))
                if normalize_identifier(&current) != normalize_identifier(legacy) =>
            {
                return Ok(TargetName::Renamed(k8s_format(
                    legacy,
                    &ids.cluster_name,
                    &ids.database_username,
                )));
            }
            (Some(current), _) => current,
            (None, Some(legacy)) => legacy.clone(),
            (None, None) => {
                return Err(ConnectionSecretError::ProjectNameUnresolved {
                    project_id: ids.project_id.clone(),
                })
            }
        };
        Ok(TargetName::Current(k8s_format(
            &project_name,
            &ids.cluster_name,
            &ids.database_username,
        )))
    }

    /// Display name of the project from a local project object or the remote
    /// project directory, in that order.
    async fn current_project_name(
        &self,
        project_id: &str,
        deployment: Option<&DatabaseDeployment>,
        user: Option<&DatabaseUser>,
    ) -> Result<Option<String>, ConnectionSecretError> {
        let bindings = deployment
            .and_then(DatabaseDeployment::project_binding)
            .into_iter()
            .chain(user.and_then(DatabaseUser::project_binding));
        for binding in bindings {
            if let ProjectBinding::Local { namespace, name } = binding {
                if let Some(project_name) = self.cache.local_project_name(&namespace, &name) {
                    return Ok(Some(project_name));
                }
            }
        }

        match &self.directory {
            Some(directory) => Ok(directory.project_name(project_id).await?),
            None => Ok(None),
        }
    }

    /// Project-wide orphan sweep. Skipped until every cache completed its
    /// initial list.
    pub async fn sweep_orphans(&self, project_id: &str) -> Result<Vec<String>, StoreError> {
        if !self.cache.is_synced() {
            debug!(project.id = project_id, "Cache not synced yet, skipping orphan sweep");
            return Ok(Vec::new());
        }
        let clusters: BTreeSet<String> = self
            .cache
            .deployments_in_project(project_id)
            .iter()
            .map(|d| d.deployment_name().to_string())
            .collect();
        reap_orphans(
            self.store.as_ref(),
            self.events.as_ref(),
            project_id,
            &clusters,
        )
        .await
    }

    /// Remove secrets of `project_id` still named after a previous display
    /// name of the project
    pub async fn sweep_renamed_project(
        &self,
        project_id: &str,
        project_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        reap_renamed_project(
            self.store.as_ref(),
            self.events.as_ref(),
            project_id,
            project_name,
        )
        .await
    }

    /// Remove secrets still named after a renamed user's previous username
    pub async fn sweep_stale_usernames(
        &self,
        user: &DatabaseUser,
    ) -> Result<Vec<String>, StoreError> {
        let (Some(previous), Some(project_id)) =
            (user.previous_username(), self.cache.project_id_of_user(user))
        else {
            return Ok(Vec::new());
        };
        reap_stale_usernames(
            self.store.as_ref(),
            self.events.as_ref(),
            &project_id,
            &user.namespace().unwrap_or_default(),
            previous,
        )
        .await
    }
}
