//! # Resource Cache
//!
//! In-memory view of projects, deployments and users, kept current by the
//! watch streams. Cross-resource joins go through explicit secondary indexes:
//!
//! | Index | Key | Namespace scoped |
//! |---|---|---|
//! | deployments by cluster | `(projectID, normalized deployment name)` | no |
//! | deployments by project | `projectID` | no |
//! | users by username | `(projectID, normalized username)` | filtered at query time |
//! | users by project | `projectID` | no |
//!
//! A deployment or user whose project ID cannot be resolved yet (local
//! project not provisioned) is cached but not indexed. Applying a project
//! re-indexes everything bound to it.

use crate::controller::connsecret::identifiers::normalize_identifier;
use crate::crd::{DatabaseDeployment, DatabaseProject, DatabaseUser, ProjectBinding};
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// `namespace/name` of a cached object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

/// Composite `(projectID, normalized name)` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub project_id: String,
    pub name: String,
}

impl PairKey {
    #[must_use]
    pub fn new(project_id: &str, name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            name: normalize_identifier(name),
        }
    }
}

/// Multi-valued index from a key to object keys.
#[derive(Debug)]
pub struct SecondaryIndex<K> {
    entries: HashMap<K, BTreeSet<ObjectKey>>,
}

impl<K> Default for SecondaryIndex<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> SecondaryIndex<K> {
    pub fn insert(&mut self, key: K, object: ObjectKey) {
        self.entries.entry(key).or_default().insert(object);
    }

    pub fn remove(&mut self, key: &K, object: &ObjectKey) {
        if let Some(set) = self.entries.get_mut(key) {
            set.remove(object);
            if set.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    pub fn get(&self, key: &K) -> impl Iterator<Item = &ObjectKey> {
        self.entries.get(key).into_iter().flatten()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

/// Which watch a cache section belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Projects,
    Deployments,
    Users,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [Self::Projects, Self::Deployments, Self::Users];
}

#[derive(Debug)]
struct Entry<K> {
    object: K,
    /// Index key under which the object is currently registered
    key: Option<PairKey>,
}

#[derive(Debug, Default)]
struct CacheState {
    projects: HashMap<ObjectKey, DatabaseProject>,
    deployments: HashMap<ObjectKey, Entry<DatabaseDeployment>>,
    users: HashMap<ObjectKey, Entry<DatabaseUser>>,
    deployments_by_cluster: SecondaryIndex<PairKey>,
    deployments_by_project: SecondaryIndex<String>,
    users_by_username: SecondaryIndex<PairKey>,
    users_by_project: SecondaryIndex<String>,
    synced: HashSet<CacheKind>,
    /// Objects seen since the current relist started, per kind
    relisting: HashMap<CacheKind, HashSet<ObjectKey>>,
}

impl CacheState {
    fn project_id(&self, binding: Option<ProjectBinding>) -> Option<String> {
        match binding? {
            ProjectBinding::External { id } => Some(id),
            ProjectBinding::Local { namespace, name } => self
                .projects
                .get(&ObjectKey { namespace, name })
                .and_then(DatabaseProject::project_id)
                .map(str::to_string),
        }
    }

    fn index_deployment(
        &mut self,
        key: ObjectKey,
        deployment: DatabaseDeployment,
    ) -> Option<DatabaseDeployment> {
        let previous = self.unindex_deployment(&key);
        let pair_key = self
            .project_id(deployment.project_binding())
            .map(|pid| PairKey::new(&pid, deployment.deployment_name()));
        if let Some(pair_key) = &pair_key {
            self.deployments_by_cluster.insert(pair_key.clone(), key.clone());
            self.deployments_by_project
                .insert(pair_key.project_id.clone(), key.clone());
        }
        self.deployments.insert(
            key,
            Entry {
                object: deployment,
                key: pair_key,
            },
        );
        previous
    }

    fn unindex_deployment(&mut self, key: &ObjectKey) -> Option<DatabaseDeployment> {
        let entry = self.deployments.remove(key)?;
        if let Some(pair_key) = &entry.key {
            self.deployments_by_cluster.remove(pair_key, key);
            self.deployments_by_project.remove(&pair_key.project_id, key);
        }
        Some(entry.object)
    }

    fn index_user(&mut self, key: ObjectKey, user: DatabaseUser) -> Option<DatabaseUser> {
        let previous = self.unindex_user(&key);
        let pair_key = self
            .project_id(user.project_binding())
            .map(|pid| PairKey::new(&pid, user.username()));
        if let Some(pair_key) = &pair_key {
            self.users_by_username.insert(pair_key.clone(), key.clone());
            self.users_by_project
                .insert(pair_key.project_id.clone(), key.clone());
        }
        self.users.insert(
            key,
            Entry {
                object: user,
                key: pair_key,
            },
        );
        previous
    }

    fn unindex_user(&mut self, key: &ObjectKey) -> Option<DatabaseUser> {
        let entry = self.users.remove(key)?;
        if let Some(pair_key) = &entry.key {
            self.users_by_username.remove(pair_key, key);
            self.users_by_project.remove(&pair_key.project_id, key);
        }
        Some(entry.object)
    }

    /// Re-index every deployment and user bound to a local project
    fn reindex_bound_to(&mut self, project: &ObjectKey) {
        let bound = |binding: Option<ProjectBinding>| {
            matches!(binding, Some(ProjectBinding::Local { namespace, name })
                if namespace == project.namespace && name == project.name)
        };

        let deployments: Vec<ObjectKey> = self
            .deployments
            .iter()
            .filter(|(_, e)| bound(e.object.project_binding()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in deployments {
            if let Some(deployment) = self.unindex_deployment(&key) {
                self.index_deployment(key, deployment);
            }
        }

        let users: Vec<ObjectKey> = self
            .users
            .iter()
            .filter(|(_, e)| bound(e.object.project_binding()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in users {
            if let Some(user) = self.unindex_user(&key) {
                self.index_user(key, user);
            }
        }
    }

    fn mark_seen(&mut self, kind: CacheKind, key: &ObjectKey) {
        if let Some(seen) = self.relisting.get_mut(&kind) {
            seen.insert(key.clone());
        }
    }
}

/// Objects dropped when a relist completed without seeing them
#[derive(Debug, Default)]
pub struct RelistRemovals {
    pub deployments: Vec<DatabaseDeployment>,
    pub users: Vec<DatabaseUser>,
}

/// Shared cache of watched resources and their secondary indexes.
#[derive(Debug, Default)]
pub struct ResourceCache {
    state: RwLock<CacheState>,
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply_project(&self, project: DatabaseProject) -> Option<DatabaseProject> {
        let key = ObjectKey::of(&project);
        let mut state = self.write();
        state.mark_seen(CacheKind::Projects, &key);
        let id_changed = state
            .projects
            .get(&key)
            .map(DatabaseProject::project_id)
            != Some(project.project_id());
        let previous = state.projects.insert(key.clone(), project);
        if id_changed {
            state.reindex_bound_to(&key);
        }
        previous
    }

    pub fn delete_project(&self, project: &DatabaseProject) -> Option<DatabaseProject> {
        let key = ObjectKey::of(project);
        let mut state = self.write();
        let previous = state.projects.remove(&key);
        state.reindex_bound_to(&key);
        previous
    }

    /// Insert or replace a deployment, returning the previous version
    pub fn apply_deployment(&self, deployment: DatabaseDeployment) -> Option<DatabaseDeployment> {
        let key = ObjectKey::of(&deployment);
        let mut state = self.write();
        state.mark_seen(CacheKind::Deployments, &key);
        state.index_deployment(key, deployment)
    }

    pub fn delete_deployment(&self, deployment: &DatabaseDeployment) -> Option<DatabaseDeployment> {
        self.write().unindex_deployment(&ObjectKey::of(deployment))
    }

    /// Insert or replace a user, returning the previous version
    pub fn apply_user(&self, user: DatabaseUser) -> Option<DatabaseUser> {
        let key = ObjectKey::of(&user);
        let mut state = self.write();
        state.mark_seen(CacheKind::Users, &key);
        state.index_user(key, user)
    }

    pub fn delete_user(&self, user: &DatabaseUser) -> Option<DatabaseUser> {
        self.write().unindex_user(&ObjectKey::of(user))
    }

    /// Deployments named `cluster` in `project_id`, any namespace
    #[must_use]
    pub fn deployments_for(&self, project_id: &str, cluster: &str) -> Vec<DatabaseDeployment> {
        let state = self.read();
        state
            .deployments_by_cluster
            .get(&PairKey::new(project_id, cluster))
            .filter_map(|k| state.deployments.get(k))
            .map(|e| e.object.clone())
            .collect()
    }

    /// Users named `username` in `project_id` living in `namespace`
    #[must_use]
    pub fn users_for(
        &self,
        project_id: &str,
        username: &str,
        namespace: &str,
    ) -> Vec<DatabaseUser> {
        let state = self.read();
        state
            .users_by_username
            .get(&PairKey::new(project_id, username))
            .filter(|k| k.namespace == namespace)
            .filter_map(|k| state.users.get(k))
            .map(|e| e.object.clone())
            .collect()
    }

    #[must_use]
    pub fn deployments_in_project(&self, project_id: &str) -> Vec<DatabaseDeployment> {
        let state = self.read();
        state
            .deployments_by_project
            .get(&project_id.to_string())
            .filter_map(|k| state.deployments.get(k))
            .map(|e| e.object.clone())
            .collect()
    }

    #[must_use]
    pub fn users_in_project(&self, project_id: &str) -> Vec<DatabaseUser> {
        let state = self.read();
        state
            .users_by_project
            .get(&project_id.to_string())
            .filter_map(|k| state.users.get(k))
            .map(|e| e.object.clone())
            .collect()
    }

    /// Every project ID referenced by a cached object or provisioned project
    #[must_use]
    pub fn known_project_ids(&self) -> BTreeSet<String> {
        let state = self.read();
        state
            .deployments_by_project
            .keys()
            .chain(state.users_by_project.keys())
            .cloned()
            .chain(
                state
                    .projects
                    .values()
                    .filter_map(|p| p.project_id().map(str::to_string)),
            )
            .collect()
    }

    #[must_use]
    pub fn project_id_of_deployment(&self, deployment: &DatabaseDeployment) -> Option<String> {
        self.read().project_id(deployment.project_binding())
    }

    #[must_use]
    pub fn project_id_of_user(&self, user: &DatabaseUser) -> Option<String> {
        self.read().project_id(user.project_binding())
    }

    /// `spec.name` of a local project
    #[must_use]
    pub fn local_project_name(&self, namespace: &str, name: &str) -> Option<String> {
        self.read()
            .projects
            .get(&ObjectKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
            .map(|p| p.spec.name.clone())
    }

    /// A relist of `kind` started; its initial sync is no longer complete
    pub fn begin_relist(&self, kind: CacheKind) {
        let mut state = self.write();
        state.synced.remove(&kind);
        state.relisting.insert(kind, HashSet::new());
    }

    /// A relist of `kind` finished: drop every object it did not report and
    /// mark the kind synced.
    pub fn finish_relist(&self, kind: CacheKind) -> RelistRemovals {
        let mut state = self.write();
        let seen = state.relisting.remove(&kind).unwrap_or_default();
        let mut removals = RelistRemovals::default();

        match kind {
            CacheKind::Projects => {
                let stale: Vec<ObjectKey> = state
                    .projects
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                for key in stale {
                    state.projects.remove(&key);
                    state.reindex_bound_to(&key);
                }
            }
            CacheKind::Deployments => {
                let stale: Vec<ObjectKey> = state
                    .deployments
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                removals.deployments = stale
                    .iter()
                    .filter_map(|k| state.unindex_deployment(k))
                    .collect();
            }
            CacheKind::Users => {
                let stale: Vec<ObjectKey> = state
                    .users
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                removals.users = stale.iter().filter_map(|k| state.unindex_user(k)).collect();
            }
        }

        state.synced.insert(kind);
        removals
    }

    /// Mark a kind synced without a relist (used by fixtures)
    pub fn mark_synced(&self, kind: CacheKind) {
        self.write().synced.insert(kind);
    }

    /// True once every kind completed its initial list
    #[must_use]
    pub fn is_synced(&self) -> bool {
        let state = self.read();
        CacheKind::ALL.iter().all(|k| state.synced.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        DatabaseDeploymentSpec, DatabaseProjectSpec, DatabaseProjectStatus, DatabaseUserSpec,
        ExternalProjectReference, ResourceReference,
    };

    fn external_deployment(ns: &str, name: &str, pid: &str, cluster: &str) -> DatabaseDeployment {
        let mut d = DatabaseDeployment::new(
            name,
            DatabaseDeploymentSpec {
                deployment_name: cluster.to_string(),
                project_ref: None,
                external_project_ref: Some(ExternalProjectReference {
                    id: pid.to_string(),
                }),
            },
        );
        d.metadata.namespace = Some(ns.to_string());
        d
    }

    fn local_user(ns: &str, name: &str, project: &str, username: &str) -> DatabaseUser {
        let mut u = DatabaseUser::new(
            name,
            DatabaseUserSpec {
                username: username.to_string(),
                project_ref: Some(ResourceReference {
                    name: project.to_string(),
                    namespace: None,
                }),
                external_project_ref: None,
                password_secret_ref: None,
                scopes: vec![],
                delete_after_date: None,
            },
        );
        u.metadata.namespace = Some(ns.to_string());
        u
    }

    fn project(ns: &str, name: &str, id: Option<&str>) -> DatabaseProject {
        let mut p = DatabaseProject::new(
            name,
            DatabaseProjectSpec {
                name: name.to_uppercase(),
            },
        );
        p.metadata.namespace = Some(ns.to_string());
        p.status = Some(DatabaseProjectStatus {
            id: id.map(str::to_string),
            conditions: vec![],
        });
        p
    }

    #[test]
    fn test_deployment_lookup_by_composite_key() {
        let cache = ResourceCache::new();
        cache.apply_deployment(external_deployment("ns-a", "d1", "pid1", "Cluster1"));
        cache.apply_deployment(external_deployment("ns-b", "d2", "pid2", "cluster1"));

        let found = cache.deployments_for("pid1", "cluster1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "d1");
        assert!(cache.deployments_for("pid3", "cluster1").is_empty());
        assert_eq!(cache.deployments_in_project("pid2").len(), 1);
    }

    #[test]
    fn test_user_lookup_is_namespace_scoped() {
        let cache = ResourceCache::new();
        cache.apply_project(project("ns-a", "p", Some("pid1")));
        cache.apply_project(project("ns-b", "p", Some("pid1")));
        cache.apply_user(local_user("ns-a", "u1", "p", "admin"));
        cache.apply_user(local_user("ns-b", "u2", "p", "admin"));

        let found = cache.users_for("pid1", "admin", "ns-a");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "u1");
        assert_eq!(cache.users_in_project("pid1").len(), 2);
    }

    #[test]
    fn test_users_are_indexed_once_project_is_provisioned() {
        let cache = ResourceCache::new();
        cache.apply_project(project("ns-a", "p", None));
        cache.apply_user(local_user("ns-a", "u1", "p", "admin"));
        assert!(cache.users_in_project("pid1").is_empty());

        cache.apply_project(project("ns-a", "p", Some("pid1")));
        assert_eq!(cache.users_for("pid1", "admin", "ns-a").len(), 1);
        assert_eq!(cache.local_project_name("ns-a", "p").as_deref(), Some("P"));
    }

    #[test]
    fn test_reapplying_moves_index_entries() {
        let cache = ResourceCache::new();
        cache.apply_deployment(external_deployment("ns-a", "d1", "pid1", "cluster1"));
        let previous =
            cache.apply_deployment(external_deployment("ns-a", "d1", "pid1", "cluster2"));

        assert_eq!(previous.map(|d| d.spec.deployment_name), Some("cluster1".to_string()));
        assert!(cache.deployments_for("pid1", "cluster1").is_empty());
        assert_eq!(cache.deployments_for("pid1", "cluster2").len(), 1);

        cache.delete_deployment(&external_deployment("ns-a", "d1", "pid1", "cluster2"));
        assert!(cache.deployments_in_project("pid1").is_empty());
    }

    #[test]
    fn test_relist_drops_unseen_objects_and_marks_synced() {
        let cache = ResourceCache::new();
        cache.apply_deployment(external_deployment("ns-a", "gone", "pid1", "cluster1"));
        assert!(!cache.is_synced());

        cache.begin_relist(CacheKind::Deployments);
        cache.apply_deployment(external_deployment("ns-a", "kept", "pid1", "cluster2"));
        let removals = cache.finish_relist(CacheKind::Deployments);

        assert_eq!(removals.deployments.len(), 1);
        assert_eq!(removals.deployments[0].name_any(), "gone");
        assert!(cache.deployments_for("pid1", "cluster1").is_empty());

        cache.finish_relist(CacheKind::Projects);
        cache.finish_relist(CacheKind::Users);
        assert!(cache.is_synced());
    }
}
