//! # Custom Resources
//!
//! Resource kinds the controller consumes. Provisioning of these objects is
//! owned by other controllers; this crate only reads them.

mod common;
mod deployment;
mod project;
mod user;

pub use common::{
    is_condition_true, Condition, ExternalProjectReference, LocalObjectReference, ProjectBinding,
    ResourceReference,
};
pub use deployment::{
    ConnectionStrings, DatabaseDeployment, DatabaseDeploymentSpec, DatabaseDeploymentStatus,
    PrivateEndpoint,
};
pub use project::{DatabaseProject, DatabaseProjectSpec, DatabaseProjectStatus};
pub use user::{
    DatabaseUser, DatabaseUserSpec, DatabaseUserStatus, ScopeType, UserScope,
};
