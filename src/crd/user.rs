//! # DatabaseUser
//!
//! A database credential. Scopes restrict which deployments the credential
//! may reach; `deleteAfterDate` bounds its lifetime.

use crate::constants::READY_CONDITION;
use crate::crd::{
    is_condition_true, Condition, ExternalProjectReference, LocalObjectReference, ProjectBinding,
    ResourceReference,
};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "DatabaseUser",
    group = "dbaas.octopilot.io",
    version = "v1",
    namespaced,
    status = "DatabaseUserStatus",
    shortname = "dbu",
    printcolumn = r#"{"name":"Username", "type":"string", "jsonPath":".spec.username"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserSpec {
    pub username: String,
    #[serde(default)]
    pub project_ref: Option<ResourceReference>,
    #[serde(default)]
    pub external_project_ref: Option<ExternalProjectReference>,
    /// Secret in the user's namespace holding the plaintext password under `password`
    #[serde(default)]
    pub password_secret_ref: Option<LocalObjectReference>,
    /// Deployments (and data lakes) this user is limited to; empty means unrestricted
    #[serde(default)]
    pub scopes: Vec<UserScope>,
    /// ISO-8601 instant after which the user and its secrets are removed
    #[serde(default)]
    pub delete_after_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserScope {
    /// Deployment or data lake name
    pub name: String,
    #[serde(rename = "type", default)]
    pub scope_type: ScopeType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeType {
    #[default]
    Cluster,
    DataLake,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Username last applied upstream; differs from `spec.username` during a rename
    #[serde(default)]
    pub username: Option<String>,
}

impl DatabaseUser {
    #[must_use]
    pub fn username(&self) -> &str {
        &self.spec.username
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_condition_true(&s.conditions, READY_CONDITION))
    }

    #[must_use]
    pub fn project_binding(&self) -> Option<ProjectBinding> {
        ProjectBinding::from_refs(
            self.spec.project_ref.as_ref(),
            self.spec.external_project_ref.as_ref(),
            &self.namespace().unwrap_or_default(),
        )
    }

    /// Names of `CLUSTER` scopes; data lake scopes never restrict deployments
    pub fn cluster_scopes(&self) -> impl Iterator<Item = &str> {
        self.spec
            .scopes
            .iter()
            .filter(|s| s.scope_type == ScopeType::Cluster)
            .map(|s| s.name.as_str())
    }

    /// Username from status when it differs from the desired username
    #[must_use]
    pub fn previous_username(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.username.as_deref())
            .filter(|old| !old.is_empty() && *old != self.spec.username)
    }
}
