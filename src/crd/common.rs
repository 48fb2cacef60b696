//! Shared reference and condition types.

use crate::constants::READY_CONDITION;
use serde::{Deserialize, Serialize};

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    /// Convenience constructor, mostly used by tests and fixtures
    #[must_use]
    pub fn new(r#type: &str, status: bool) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    /// `Ready=True`
    #[must_use]
    pub fn ready() -> Self {
        Self::new(READY_CONDITION, true)
    }
}

/// True when a condition of `condition_type` exists with status `True`
#[must_use]
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == condition_type && c.status.eq_ignore_ascii_case("true"))
}

/// Reference to a namespaced object; namespace defaults to the referrer's
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Reference to an object in the referrer's own namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub name: String,
}

/// Reference to a project that is not managed in-cluster
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProjectReference {
    /// Remote project ID
    pub id: String,
}

/// How a deployment or user is bound to its project
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectBinding {
    /// A `DatabaseProject` object in the cluster
    Local { namespace: String, name: String },
    /// A project known only by its remote ID
    External { id: String },
}

impl ProjectBinding {
    /// Resolve the binding from the optional `projectRef` / `externalProjectRef` pair.
    ///
    /// `externalProjectRef` wins when both are set.
    pub(crate) fn from_refs(
        project_ref: Option<&ResourceReference>,
        external: Option<&ExternalProjectReference>,
        referrer_namespace: &str,
    ) -> Option<Self> {
        if let Some(external) = external.filter(|e| !e.id.trim().is_empty()) {
            return Some(Self::External {
                id: external.id.trim().to_string(),
            });
        }
        project_ref.map(|r| Self::Local {
            namespace: r
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| referrer_namespace.to_string()),
            name: r.name.clone(),
        })
    }
}
