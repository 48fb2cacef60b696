//! # DatabaseProject

use crate::crd::Condition;
use serde::{Deserialize, Serialize};

/// A project grouping deployments and users.
///
/// Only `spec.name` (the display name used for secret naming) and
/// `status.id` (the remote ID) are read by this controller.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "DatabaseProject",
    group = "dbaas.octopilot.io",
    version = "v1",
    namespaced,
    status = "DatabaseProjectStatus",
    shortname = "dbp",
    printcolumn = r#"{"name":"Name", "type":"string", "jsonPath":".spec.name"}, {"name":"ID", "type":"string", "jsonPath":".status.id"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseProjectSpec {
    /// Display name of the project
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseProjectStatus {
    /// Remote project ID, set once the project is provisioned
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl DatabaseProject {
    /// Remote project ID, if provisioned
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}
