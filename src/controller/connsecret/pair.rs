//! # Resource Pair Resolver
//!
//! Joins a [`ResourceIdentifierSet`] back to the deployment and user it names.

use crate::controller::connsecret::identifiers::ResourceIdentifierSet;
use crate::controller::index::ResourceCache;
use crate::crd::{DatabaseDeployment, DatabaseUser};
use thiserror::Error;

/// A resolved join result, owned by one reconcile invocation
#[derive(Debug, Clone)]
pub struct ResourcePair {
    pub project_id: String,
    pub deployment: DatabaseDeployment,
    pub user: DatabaseUser,
}

/// Outcome of resolving a pair. Ambiguity on either side is checked first.
#[derive(Debug, Clone)]
pub enum PairResolution {
    /// Neither side exists; nothing was ever derived from this key
    NothingToDo,
    /// The deployment is gone; the secret must be deleted.
    /// The user is carried only for project name resolution.
    DeploymentMissing { user: Option<DatabaseUser> },
    /// The user is gone; the secret must be deleted
    UserMissing { deployment: Option<DatabaseDeployment> },
    Resolved(ResourcePair),
}

/// More than one candidate on either side. Never resolved by picking one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmbiguityError {
    #[error("{count} deployments named {cluster:?} in project {project_id}")]
    ManyDeployments {
        project_id: String,
        cluster: String,
        count: usize,
    },
    #[error("{count} users named {username:?} in project {project_id} (namespace {namespace})")]
    ManyUsers {
        project_id: String,
        username: String,
        namespace: String,
        count: usize,
    },
}

/// Resolve the pair named by `ids` for a request in `namespace`.
pub fn resolve_pair(
    cache: &ResourceCache,
    ids: &ResourceIdentifierSet,
    namespace: &str,
) -> Result<PairResolution, AmbiguityError> {
    let deployments = cache.deployments_for(&ids.project_id, &ids.cluster_name);
    let users = cache.users_for(&ids.project_id, &ids.database_username, namespace);
    classify(ids, namespace, deployments, users)
}

fn classify(
    ids: &ResourceIdentifierSet,
    namespace: &str,
    mut deployments: Vec<DatabaseDeployment>,
    mut users: Vec<DatabaseUser>,
) -> Result<PairResolution, AmbiguityError> {
    // Ambiguity wins over a missing side: no delete on a guessed candidate
    match (deployments.len(), users.len()) {
        (d, _) if d > 1 => Err(AmbiguityError::ManyDeployments {
            project_id: ids.project_id.clone(),
            cluster: ids.cluster_name.clone(),
            count: d,
        }),
        (_, u) if u > 1 => Err(AmbiguityError::ManyUsers {
            project_id: ids.project_id.clone(),
            username: ids.database_username.clone(),
            namespace: namespace.to_string(),
            count: u,
        }),
        (0, 0) => Ok(PairResolution::NothingToDo),
        (0, _) => Ok(PairResolution::DeploymentMissing { user: users.pop() }),
        (_, 0) => Ok(PairResolution::UserMissing {
            deployment: deployments.pop(),
        }),
        _ => match (deployments.pop(), users.pop()) {
            (Some(deployment), Some(user)) => Ok(PairResolution::Resolved(ResourcePair {
                project_id: ids.project_id.clone(),
                deployment,
                user,
            })),
            _ => Ok(PairResolution::NothingToDo),
        },
    }
}
