//! # Watch Fan-out
//!
//! Maps a change on one side of a pair to the reconcile requests of every
//! pair it participates in. Requests are namespaced to the user's namespace
//! and named in the internal encoding.
//!
//! Only changes that can alter a secret fan out: deletions, a side turning
//! ready, and spec changes (generation bumps).

use crate::controller::connsecret::identifiers::{ReconcileRequest, ResourceIdentifierSet};
use crate::controller::index::ResourceCache;
use crate::crd::{DatabaseDeployment, DatabaseUser};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Watch registration state, built once at startup and shared by the watch
/// streams.
#[derive(Debug, Clone)]
pub struct WatchRegistry {
    cache: Arc<ResourceCache>,
}

impl WatchRegistry {
    #[must_use]
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self { cache }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Requests for every user of the deployment's project that may reach it
    #[must_use]
    pub fn requests_for_deployment(
        &self,
        deployment: &DatabaseDeployment,
    ) -> Vec<ReconcileRequest> {
        let Some(project_id) = self.cache.project_id_of_deployment(deployment) else {
            return Vec::new();
        };
        let users = self.cache.users_in_project(&project_id);
        pair_requests(&project_id, std::slice::from_ref(deployment), &users)
    }

    /// Requests for every deployment of the user's project the user may
    /// reach, plus those its previous version could reach so that a narrowed
    /// scope deletes the secrets it excludes.
    #[must_use]
    pub fn requests_for_user(
        &self,
        user: &DatabaseUser,
        previous: Option<&DatabaseUser>,
    ) -> Vec<ReconcileRequest> {
        let Some(project_id) = self.cache.project_id_of_user(user) else {
            return Vec::new();
        };
        let namespace = user.namespace().unwrap_or_default();
        self.cache
            .deployments_in_project(&project_id)
            .iter()
            .filter(|d| in_scope(user, d) || previous.is_some_and(|p| in_scope(p, d)))
            .map(|d| {
                ReconcileRequest::for_pair(
                    &namespace,
                    &ResourceIdentifierSet::new(&project_id, d.deployment_name(), user.username()),
                )
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Scope-bounded cross product of `deployments` and `users`, deduplicated
/// and sorted.
#[must_use]
pub fn pair_requests(
    project_id: &str,
    deployments: &[DatabaseDeployment],
    users: &[DatabaseUser],
) -> Vec<ReconcileRequest> {
    let mut requests = BTreeSet::new();
    for deployment in deployments {
        for user in users.iter().filter(|u| in_scope(u, deployment)) {
            let ids = ResourceIdentifierSet::new(
                project_id,
                deployment.deployment_name(),
                user.username(),
            );
            requests.insert(ReconcileRequest::for_pair(
                &user.namespace().unwrap_or_default(),
                &ids,
            ));
        }
    }
    requests.into_iter().collect()
}

/// Empty cluster scope list means unrestricted
#[must_use]
pub fn in_scope(user: &DatabaseUser, deployment: &DatabaseDeployment) -> bool {
    let mut scopes = user.cluster_scopes().peekable();
    scopes.peek().is_none() || scopes.any(|s| s == deployment.deployment_name())
}

/// Request for a connection secret seen by the secret watch (legacy encoding)
#[must_use]
pub fn request_for_secret(secret: &Secret) -> ReconcileRequest {
    ReconcileRequest::new(secret.namespace().unwrap_or_default(), secret.name_any())
}

/// Whether a deployment update can change its secrets
#[must_use]
pub fn deployment_changed(
    previous: Option<&DatabaseDeployment>,
    current: &DatabaseDeployment,
) -> bool {
    match previous {
        None => current.is_ready(),
        Some(previous) => {
            (!previous.is_ready() && current.is_ready())
                || previous.metadata.generation != current.metadata.generation
        }
    }
}

/// Whether a user update can change its secrets
#[must_use]
pub fn user_changed(previous: Option<&DatabaseUser>, current: &DatabaseUser) -> bool {
    match previous {
        None => current.is_ready(),
        Some(previous) => {
            (!previous.is_ready() && current.is_ready())
                || previous.metadata.generation != current.metadata.generation
        }
    }
}
