//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Defaults here can be overridden through environment variables where
//! [`crate::config::ControllerConfig`] exposes them.

/// API group of the consumed custom resources
pub const API_GROUP: &str = "dbaas.octopilot.io";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default number of reconcile workers draining the request queue
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default Fibonacci backoff floor for transient errors (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default Fibonacci backoff ceiling for transient errors (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default requeue delay while either side of a pair is not ready (seconds)
pub const DEFAULT_NOT_READY_REQUEUE_SECS: u64 = 10;

/// Default interval between project-wide orphan sweeps (seconds)
pub const DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default number of fresh-read/write attempts for a single upsert
pub const DEFAULT_UPSERT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before restarting a watch stream after an error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Label marking a secret as a managed connection secret
pub const LABEL_TYPE: &str = "dbaas.octopilot.io/type";

/// Value of [`LABEL_TYPE`] on connection secrets
pub const LABEL_TYPE_CREDENTIAL: &str = "credential";

/// Label carrying the remote project ID
pub const LABEL_PROJECT_ID: &str = "dbaas.octopilot.io/project-id";

/// Label carrying the normalized deployment (cluster) name
pub const LABEL_CLUSTER_NAME: &str = "dbaas.octopilot.io/cluster-name";

/// Key of the plaintext password in a user's password secret
pub const PASSWORD_SECRET_KEY: &str = "password";

/// Condition type signalling readiness on deployments and users
pub const READY_CONDITION: &str = "Ready";

/// Field manager / reporter name used for events
pub const CONTROLLER_NAME: &str = "connection-secret-controller";
