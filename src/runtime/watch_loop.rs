//! # Watch Loop
//!
//! Runs one watcher per kind (projects, deployments, users and labelled
//! connection secrets), keeps the resource cache current, fans changes out
//! into reconcile requests and drains the queue with a bounded worker pool.

use crate::constants::{LABEL_TYPE, LABEL_TYPE_CREDENTIAL};
use crate::controller::connsecret::fanout::{
    deployment_changed, request_for_secret, user_changed,
};
use crate::controller::connsecret::{ReconcileRequest, Reconciler, WatchRegistry};
use crate::controller::index::{CacheKind, ResourceCache};
use crate::crd::{DatabaseDeployment, DatabaseProject, DatabaseUser};
use crate::observability::metrics;
use crate::runtime::error_policy::{handle_watch_stream_error, requeue_for, Requeue};
use crate::runtime::initialization::InitializationResult;
use crate::runtime::queue::{TriggerSource, WorkQueue};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop(init: InitializationResult) -> Result<(), anyhow::Error> {
    let InitializationResult {
        client,
        reconciler,
        registry,
        server_state,
        config,
    } = init;

    let (queue, receiver) = WorkQueue::new();
    let handlers = Arc::new(WatchHandlers {
        registry,
        queue: queue.clone(),
        reconciler: Arc::clone(&reconciler),
        server_state: Arc::clone(&server_state),
    });
    let namespace = config.watch_namespace.as_deref();
    let restart_delay = config.watch_restart_delay_duration();

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let h = Arc::clone(&handlers);
    tasks.push(tokio::spawn(run_watch(
        scoped_api::<DatabaseProject>(&client, namespace),
        watcher::Config::default(),
        "DatabaseProject",
        restart_delay,
        move |event| h.on_project(event),
    )));

    let h = Arc::clone(&handlers);
    tasks.push(tokio::spawn(run_watch(
        scoped_api::<DatabaseDeployment>(&client, namespace),
        watcher::Config::default(),
        "DatabaseDeployment",
        restart_delay,
        move |event| h.on_deployment(event),
    )));

    let h = Arc::clone(&handlers);
    tasks.push(tokio::spawn(run_watch(
        scoped_api::<DatabaseUser>(&client, namespace),
        watcher::Config::default(),
        "DatabaseUser",
        restart_delay,
        move |event| h.on_user(event),
    )));

    let h = Arc::clone(&handlers);
    tasks.push(tokio::spawn(run_watch(
        scoped_api::<Secret>(&client, namespace),
        watcher::Config::default().labels(&format!("{LABEL_TYPE}={LABEL_TYPE_CREDENTIAL}")),
        "Secret",
        restart_delay,
        move |event| h.on_secret(&event),
    )));

    if let Some(interval) = config.orphan_sweep_interval() {
        tasks.push(tokio::spawn(run_orphan_sweeps(
            Arc::clone(&reconciler),
            interval,
        )));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        let _ = shutdown_tx.send(true);
    });

    info!("Controller watch loop started");
    run_workers(
        receiver,
        queue,
        reconciler,
        config.max_concurrent_reconciliations,
        shutdown_rx,
    )
    .await;

    for task in tasks {
        task.abort();
    }
    info!("Controller stopped gracefully");
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Drive one watcher forever, restarting it if the stream ever ends
async fn run_watch<K, F>(
    api: Api<K>,
    config: watcher::Config,
    kind: &'static str,
    restart_delay: Duration,
    mut handle: F,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(Event<K>) + Send + 'static,
{
    loop {
        info!("Starting {} watch", kind);
        let stream = watcher::watcher(api.clone(), config.clone()).default_backoff();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => handle(event),
                Err(e) => handle_watch_stream_error(kind, &e),
            }
        }

        warn!(
            "{} watch stream ended, restarting in {} seconds...",
            kind,
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }
}

/// Watch event handlers sharing the cache, queue and reconciler
struct WatchHandlers {
    registry: WatchRegistry,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
}

impl WatchHandlers {
    fn cache(&self) -> &ResourceCache {
        self.registry.cache()
    }

    fn on_project(&self, event: Event<DatabaseProject>) {
        match event {
            Event::Init => self.cache().begin_relist(CacheKind::Projects),
            Event::InitApply(project) | Event::Apply(project) => {
                let id = project.project_id().map(str::to_string);
                let display_name = project.spec.name.clone();
                let previous = self.cache().apply_project(project);
                let previous_id = previous
                    .as_ref()
                    .and_then(DatabaseProject::project_id)
                    .map(str::to_string);
                let Some(id) = id else {
                    return;
                };
                let renamed = previous_id.as_ref() == Some(&id)
                    && previous.as_ref().is_some_and(|p| p.spec.name != display_name);
                // Objects bound to this project just became (re)resolvable,
                // or their secrets need the new project name
                if previous_id.as_ref() != Some(&id) || renamed {
                    for deployment in self.cache().deployments_in_project(&id) {
                        self.queue.enqueue_all(
                            self.registry.requests_for_deployment(&deployment),
                            TriggerSource::Project,
                        );
                    }
                }
                if renamed {
                    spawn_renamed_project_sweep(Arc::clone(&self.reconciler), id, display_name);
                }
            }
            Event::Delete(project) => {
                self.cache().delete_project(&project);
            }
            Event::InitDone => {
                self.cache().finish_relist(CacheKind::Projects);
                self.check_synced();
            }
        }
    }

    fn on_deployment(&self, event: Event<DatabaseDeployment>) {
        match event {
            Event::Init => self.cache().begin_relist(CacheKind::Deployments),
            Event::InitApply(deployment) | Event::Apply(deployment) => {
                let previous = self.cache().apply_deployment(deployment.clone());
                if deployment_changed(previous.as_ref(), &deployment) {
                    self.queue.enqueue_all(
                        self.registry.requests_for_deployment(&deployment),
                        TriggerSource::Deployment,
                    );
                }
            }
            Event::Delete(deployment) => {
                self.cache().delete_deployment(&deployment);
                self.deployment_removed(&deployment);
            }
            Event::InitDone => {
                let removals = self.cache().finish_relist(CacheKind::Deployments);
                for deployment in &removals.deployments {
                    self.deployment_removed(deployment);
                }
                self.check_synced();
            }
        }
    }

    fn deployment_removed(&self, deployment: &DatabaseDeployment) {
        self.queue.enqueue_all(
            self.registry.requests_for_deployment(deployment),
            TriggerSource::Deployment,
        );
        if let Some(project_id) = self.cache().project_id_of_deployment(deployment) {
            spawn_orphan_sweep(Arc::clone(&self.reconciler), project_id);
        }
    }

    fn on_user(&self, event: Event<DatabaseUser>) {
        match event {
            Event::Init => self.cache().begin_relist(CacheKind::Users),
            Event::InitApply(user) | Event::Apply(user) => {
                let previous = self.cache().apply_user(user.clone());
                if user_changed(previous.as_ref(), &user) {
                    self.queue.enqueue_all(
                        self.registry.requests_for_user(&user, previous.as_ref()),
                        TriggerSource::User,
                    );
                    if user.previous_username().is_some() {
                        spawn_stale_username_sweep(Arc::clone(&self.reconciler), user);
                    }
                }
            }
            Event::Delete(user) => {
                self.cache().delete_user(&user);
                self.queue.enqueue_all(
                    self.registry.requests_for_user(&user, None),
                    TriggerSource::User,
                );
            }
            Event::InitDone => {
                let removals = self.cache().finish_relist(CacheKind::Users);
                for user in &removals.users {
                    self.queue.enqueue_all(
                        self.registry.requests_for_user(user, None),
                        TriggerSource::User,
                    );
                }
                self.check_synced();
            }
        }
    }

    fn on_secret(&self, event: &Event<Secret>) {
        if let Event::InitApply(secret) | Event::Apply(secret) = event {
            self.queue
                .enqueue(request_for_secret(secret), TriggerSource::Secret);
        }
    }

    /// First time every cache is synced: report ready and sweep all projects
    fn check_synced(&self) {
        if !self.cache().is_synced() {
            return;
        }
        if self.server_state.is_ready.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("Resource caches synced, controller is ready");
        for project_id in self.cache().known_project_ids() {
            spawn_orphan_sweep(Arc::clone(&self.reconciler), project_id);
        }
    }
}

fn spawn_orphan_sweep(reconciler: Arc<Reconciler>, project_id: String) {
    tokio::spawn(async move {
        if let Err(e) = reconciler.sweep_orphans(&project_id).await {
            warn!(project.id = %project_id, "Orphan sweep failed: {}", e);
        }
    });
}

fn spawn_renamed_project_sweep(reconciler: Arc<Reconciler>, project_id: String, name: String) {
    tokio::spawn(async move {
        match reconciler.sweep_renamed_project(&project_id, &name).await {
            Ok(reaped) if !reaped.is_empty() => {
                info!(
                    project.id = %project_id,
                    "Removed secrets of renamed project: {}",
                    reaped.join(", ")
                );
            }
            Ok(_) => {}
            Err(e) => warn!(project.id = %project_id, "Project rename sweep failed: {}", e),
        }
    });
}

fn spawn_stale_username_sweep(reconciler: Arc<Reconciler>, user: DatabaseUser) {
    tokio::spawn(async move {
        match reconciler.sweep_stale_usernames(&user).await {
            Ok(reaped) if !reaped.is_empty() => {
                info!("Removed secrets of renamed user: {}", reaped.join(", "));
            }
            Ok(_) => {}
            Err(e) => warn!("Stale username sweep failed: {}", e),
        }
    });
}

async fn run_orphan_sweeps(reconciler: Arc<Reconciler>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial sweep runs on sync
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let project_ids = reconciler.cache.known_project_ids();
        debug!("Periodic orphan sweep over {} project(s)", project_ids.len());
        for project_id in project_ids {
            if let Err(e) = reconciler.sweep_orphans(&project_id).await {
                warn!(project.id = %project_id, "Orphan sweep failed: {}", e);
            }
        }
    }
}

/// Drain the queue with at most `workers` concurrent reconciles. Returns
/// after shutdown once in-flight reconciles finished.
async fn run_workers(
    mut receiver: mpsc::UnboundedReceiver<ReconcileRequest>,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    workers: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = u32::try_from(workers.max(1)).unwrap_or(u32::from(u16::MAX));
    let semaphore = Arc::new(Semaphore::new(permits as usize));

    loop {
        let request = tokio::select! {
            request = receiver.recv() => match request {
                Some(request) => request,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        queue.started(&request);

        let reconciler = Arc::clone(&reconciler);
        let queue = queue.clone();
        tokio::spawn(async move {
            let _permit = permit;
            process_request(&reconciler, &queue, request).await;
        });
    }

    info!("Waiting for in-flight reconciliations to complete...");
    let _ = semaphore.acquire_many(permits).await;
}

async fn process_request(reconciler: &Reconciler, queue: &WorkQueue, request: ReconcileRequest) {
    let start = Instant::now();
    let result = reconciler.reconcile(&request).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    let source = match &result {
        Ok(outcome) => {
            debug!("Reconciled {}: {}", request, outcome.as_str());
            metrics::increment_reconciliations(outcome.as_str());
            TriggerSource::NotReady
        }
        Err(_) => {
            metrics::increment_reconciliations("error");
            TriggerSource::ErrorBackoff
        }
    };

    match requeue_for(&request, &result, reconciler) {
        Requeue::After(delay) => queue.enqueue_after(request, delay, source),
        Requeue::Never => {}
    }
}
