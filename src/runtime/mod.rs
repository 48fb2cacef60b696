//! # Runtime
//!
//! - `initialization`: process setup and collaborator wiring
//! - `watch_loop`: watchers, fan-out and the worker pool
//! - `queue`: reconcile request queue
//! - `error_policy`: requeue decisions and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod queue;
pub mod watch_loop;
