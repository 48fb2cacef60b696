//! # DatabaseDeployment
//!
//! A managed database cluster. The controller reads its display name, its
//! project binding, its readiness and the connection strings published in
//! status.

use crate::constants::READY_CONDITION;
use crate::crd::{
    is_condition_true, Condition, ExternalProjectReference, ProjectBinding, ResourceReference,
};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

/// DatabaseDeployment Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: dbaas.octopilot.io/v1
/// kind: DatabaseDeployment
/// metadata:
///   name: orders-cluster
///   namespace: team-a
/// spec:
///   deploymentName: cluster1
///   projectRef:
///     name: orders
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "DatabaseDeployment",
    group = "dbaas.octopilot.io",
    version = "v1",
    namespaced,
    status = "DatabaseDeploymentStatus",
    shortname = "dbd",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.deploymentName"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDeploymentSpec {
    /// Cluster display name, stable for the lifetime of the deployment
    pub deployment_name: String,
    /// Project managed in-cluster
    #[serde(default)]
    pub project_ref: Option<ResourceReference>,
    /// Project managed outside the cluster
    #[serde(default)]
    pub external_project_ref: Option<ExternalProjectReference>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDeploymentStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Connection endpoints published once the cluster is reachable
    #[serde(default)]
    pub connection_strings: Option<ConnectionStrings>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Connection strings without credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStrings {
    #[serde(default)]
    pub standard: String,
    #[serde(default)]
    pub standard_srv: String,
    /// Legacy single private connection (network peering)
    #[serde(default)]
    pub private: String,
    #[serde(default)]
    pub private_srv: String,
    /// One entry per private link
    #[serde(default)]
    pub private_endpoint: Vec<PrivateEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateEndpoint {
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub srv_connection_string: String,
    #[serde(default)]
    pub srv_shard_optimized_connection_string: String,
}

impl DatabaseDeployment {
    /// Cluster display name
    #[must_use]
    pub fn deployment_name(&self) -> &str {
        &self.spec.deployment_name
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

    /// Connection strings from status, empty when not yet published
    #[must_use]
    pub fn connection_strings(&self) -> ConnectionStrings {
        self.status
            .as_ref()
            .and_then(|s| s.connection_strings.clone())
            .unwrap_or_default()
    }
}
