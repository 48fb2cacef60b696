//! Connection Secret Controller Library
//!
//! Derives one Kubernetes secret per (database deployment, database user)
//! pair and keeps it in sync with both sides.
//!
//! ## Quick Start
//!
//! ```rust
//! use connection_secret_controller::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod server;
