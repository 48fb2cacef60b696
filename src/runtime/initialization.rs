//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! Kubernetes client and collaborators.

use crate::config::{env_var_opt, ControllerConfig, ServerConfig};
use crate::controller::connsecret::{Reconciler, WatchRegistry};
use crate::controller::index::ResourceCache;
use crate::observability;
use crate::provider::{
    HttpProjectDirectory, KubeCredentialReader, KubeSecretStore, RecorderEventSink,
};
use crate::server::{start_server, ServerState};
use anyhow::{bail, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub registry: WatchRegistry,
    pub server_state: Arc<ServerState>,
    pub config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field(
                "server_ready",
                &self.server_state.is_ready.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("Failed to install rustls crypto provider");
    }

    let config = Arc::new(ControllerConfig::from_env());
    let server_config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .init();

    info!("Starting Connection Secret Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    if config.enable_metrics {
        observability::register_metrics()?;
    }

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default().await?;

    let cache = Arc::new(ResourceCache::new());
    let mut reconciler = Reconciler::new(
        Arc::clone(&cache),
        Arc::new(KubeSecretStore::new(client.clone())),
        Arc::new(KubeCredentialReader::new(client.clone())),
        Arc::new(RecorderEventSink::new(
            client.clone(),
            env_var_opt("POD_NAME"),
        )),
        Arc::clone(&config),
    );
    match &config.project_api_url {
        Some(url) => {
            info!("Resolving external project names through {}", url);
            reconciler = reconciler.with_project_directory(Arc::new(HttpProjectDirectory::new(
                url,
                config.project_api_token.clone(),
            )));
        }
        None => info!("PROJECT_API_URL not set, remote project lookups disabled"),
    }

    info!("Controller namespace: {}", config.controller_namespace);
    match &config.watch_namespace {
        Some(ns) => info!("Watching namespace '{}'", ns),
        None => info!("Watching all namespaces"),
    }

    Ok(InitializationResult {
        client,
        reconciler: Arc::new(reconciler),
        registry: WatchRegistry::new(cache),
        server_state,
        config,
    })
}

/// Wait for the HTTP server to bind its listener
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let poll_interval = server_config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            bail!("HTTP server failed to start");
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            bail!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            );
        }

        tokio::time::sleep(poll_interval).await;
    }
}
