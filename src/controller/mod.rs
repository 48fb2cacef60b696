//! # Controller
//!
//! Core controller modules for the Connection Secret Controller.
//!
//! - `backoff`: Fibonacci backoff for retries
//! - `connsecret`: connection secret reconciliation
//! - `index`: in-memory caches and secondary indexes over watched objects

pub mod backoff;
pub mod connsecret;
pub mod index;
