//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_opt, env_var_or_default, env_var_or_default_bool};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
    DEFAULT_NOT_READY_REQUEUE_SECS, DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
    DEFAULT_UPSERT_MAX_ATTEMPTS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of reconcile workers draining the request queue
    pub max_concurrent_reconciliations: usize,
    /// Fibonacci backoff floor for transient errors (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for transient errors (seconds)
    pub backoff_max_secs: u64,
    /// Requeue delay while a deployment or user is not ready (seconds)
    pub not_ready_requeue_secs: u64,
    /// Interval between project-wide orphan sweeps (seconds, 0 disables the timer)
    pub orphan_sweep_interval_secs: u64,
    /// Fresh-read/write attempts per upsert before giving up with a conflict
    pub upsert_max_attempts: u32,
    /// Delay before restarting a failed watch stream (seconds)
    pub watch_restart_delay_secs: u64,
    /// Restrict all watches to one namespace (cluster-wide when unset)
    pub watch_namespace: Option<String>,
    /// Namespace the controller runs in
    pub controller_namespace: String,
    /// Base URL of the remote project directory (`GET {url}/groups/{id}`)
    pub project_api_url: Option<String>,
    /// Bearer token for the remote project directory
    pub project_api_token: Option<String>,
    /// Global log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            not_ready_requeue_secs: DEFAULT_NOT_READY_REQUEUE_SECS,
            orphan_sweep_interval_secs: DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
            upsert_max_attempts: DEFAULT_UPSERT_MAX_ATTEMPTS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_namespace: None,
            controller_namespace: "octopilot-system".to_string(),
            project_api_url: None,
            project_api_token: None,
            log_level: "INFO".to_string(),
            enable_metrics: true,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            )
            .max(1),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", defaults.backoff_min_secs)
                .max(1),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            not_ready_requeue_secs: env_var_or_default(
                "NOT_READY_REQUEUE_SECS",
                defaults.not_ready_requeue_secs,
            ),
            orphan_sweep_interval_secs: env_var_or_default(
                "ORPHAN_SWEEP_INTERVAL_SECS",
                defaults.orphan_sweep_interval_secs,
            ),
            upsert_max_attempts: env_var_or_default(
                "UPSERT_MAX_ATTEMPTS",
                defaults.upsert_max_attempts,
            )
            .max(1),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_namespace: env_var_opt("WATCH_NAMESPACE"),
            controller_namespace: env_var_opt("POD_NAMESPACE")
                .unwrap_or(defaults.controller_namespace),
            project_api_url: env_var_opt("PROJECT_API_URL"),
            project_api_token: env_var_opt("PROJECT_API_TOKEN"),
            log_level: env_var_opt("LOG_LEVEL").unwrap_or(defaults.log_level),
            enable_metrics: env_var_or_default_bool("ENABLE_METRICS", defaults.enable_metrics),
        }
    }

    /// Requeue delay while waiting on readiness
    #[must_use]
    pub fn not_ready_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    /// Orphan sweep interval, `None` when periodic sweeps are disabled
    #[must_use]
    pub fn orphan_sweep_interval(&self) -> Option<Duration> {
        (self.orphan_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.orphan_sweep_interval_secs))
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Default `EnvFilter` directive derived from `log_level`
    #[must_use]
    pub fn default_log_filter(&self) -> String {
        format!(
            "connection_secret_controller={}",
            self.log_level.to_lowercase()
        )
    }
}
