//! # Watch Loop
//!
//! Watches VaultSecret resources and feeds the scheduler.
//!
//! - Live resources get the finalizer and an applied snapshot
//! - Resources being deleted are torn down in a task, then released by removing
//!   the finalizer
//! - After every relist, workers of resources that vanished meanwhile are stopped

use crate::config::ControllerConfig;
use crate::constants::FINALIZER;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::{SpecKey, SpecSnapshot};
use crate::controller::scheduler::SyncScheduler;
use crate::controller::server::ServerState;
use crate::crd::VaultSecret;
use crate::runtime::error_policy::{handle_watch_stream_error, WatchErrorAction};
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run the controller watch loop until SIGINT/SIGTERM
///
/// Restarts the watch after stream errors; on shutdown stops every worker
/// without tearing anything down.
///
/// # Errors
/// Currently infallible; the signature leaves room for fatal watch setup errors
pub async fn run_watch_loop(
    resources: Api<VaultSecret>,
    scheduler: Arc<SyncScheduler>,
    server_state: Arc<ServerState>,
    controller_config: &ControllerConfig,
) -> Result<(), anyhow::Error> {
    let shutdown = CancellationToken::new();

    let shutdown_signal = shutdown.clone();
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        shutdown_signal.cancel();
    });

    let restart_delay = controller_config.watch_restart_delay_duration();
    let mut restart_backoff = ExponentialBackoff::new(
        controller_config.backoff_start_duration(),
        controller_config.backoff_max_duration(),
    );
    let mut handler = WatchEventHandler::new(resources.clone(), Arc::clone(&scheduler));

    'watch: while !shutdown.is_cancelled() {
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        info!(parent: &watch_span, "Starting VaultSecret watch...");

        let stream = watcher(resources.clone(), watcher::Config::default()).default_backoff();
        let mut stream = std::pin::pin!(stream);

        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => break 'watch,
                _ = handler.join_teardown(), if handler.teardowns_in_flight() > 0 => continue,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    restart_backoff.reset();
                    handler.handle(event).await;
                }
                Some(Err(e)) => {
                    let action =
                        handle_watch_stream_error(&e.to_string(), &mut restart_backoff, restart_delay)
                            .await;
                    if action == WatchErrorAction::Restart {
                        break;
                    }
                }
                None => {
                    warn!(
                        "VaultSecret watch stream ended, restarting in {} seconds...",
                        restart_delay.as_secs()
                    );
                    tokio::time::sleep(restart_delay).await;
                    break;
                }
            }
        }
    }

    if handler.teardowns_in_flight() > 0 {
        info!(
            count = handler.teardowns_in_flight(),
            "Waiting for teardowns to finish..."
        );
        while handler.join_teardown().await {}
    }
    info!("Stopping workers...");
    scheduler.shutdown().await;
    info!("Controller stopped gracefully");
    Ok(())
}

/// Routes watch events to the scheduler
///
/// Teardowns of deleted resources run as tasks so that a slow lease revoke
/// never holds up events for other resources. Each uid is torn down at most
/// once until its finalizer release fails.
pub struct WatchEventHandler {
    resources: Api<VaultSecret>,
    scheduler: Arc<SyncScheduler>,
    /// Keys listed since the last `Init`
    listed: HashSet<SpecKey>,
    /// UIDs with a teardown task running
    tearing_down: HashSet<String>,
    /// UIDs already torn down whose finalizer was released
    terminated: HashSet<String>,
    teardowns: JoinSet<(String, bool)>,
}

impl std::fmt::Debug for WatchEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchEventHandler")
            .field("listed", &self.listed.len())
            .field("tearing_down", &self.tearing_down)
            .field("terminated", &self.terminated.len())
            .finish_non_exhaustive()
    }
}

impl WatchEventHandler {
    pub fn new(resources: Api<VaultSecret>, scheduler: Arc<SyncScheduler>) -> Self {
        Self {
            resources,
            scheduler,
            listed: HashSet::new(),
            tearing_down: HashSet::new(),
            terminated: HashSet::new(),
            teardowns: JoinSet::new(),
        }
    }

    pub async fn handle(&mut self, event: watcher::Event<VaultSecret>) {
        match event {
            watcher::Event::Init => self.listed.clear(),
            watcher::Event::InitApply(resource) => {
                if let Some(snapshot) = SpecSnapshot::from_resource(&resource) {
                    self.listed.insert(snapshot.key.clone());
                }
                self.apply(&resource).await;
            }
            watcher::Event::InitDone => {
                info!(count = self.listed.len(), "VaultSecret relist complete");
                self.scheduler.retain(&self.listed).await;
            }
            watcher::Event::Apply(resource) => self.apply(&resource).await,
            watcher::Event::Delete(resource) => {
                if let Some(snapshot) = SpecSnapshot::from_resource(&resource) {
                    self.tearing_down.remove(&snapshot.uid);
                    self.terminated.remove(&snapshot.uid);
                    self.scheduler.forget(&snapshot.key).await;
                }
            }
        }
    }

    /// Number of teardown tasks not yet joined
    pub fn teardowns_in_flight(&self) -> usize {
        self.teardowns.len()
    }

    /// Wait for one teardown task and record its result
    ///
    /// Returns `false` when no teardown is running.
    pub async fn join_teardown(&mut self) -> bool {
        let Some(result) = self.teardowns.join_next().await else {
            return false;
        };
        match result {
            // A Delete event may already have dropped the uid
            Ok((uid, released)) => {
                if self.tearing_down.remove(&uid) && released {
                    self.terminated.insert(uid);
                }
            }
            Err(e) => warn!(error = %e, "Teardown task failed"),
        }
        true
    }

    async fn apply(&mut self, resource: &VaultSecret) {
        let Some(snapshot) = SpecSnapshot::from_resource(resource) else {
            warn!(
                resource.name = resource.name_any().as_str(),
                "VaultSecret without namespace or uid, skipping"
            );
            return;
        };

        if resource.metadata.deletion_timestamp.is_some() {
            self.start_teardown(snapshot, resource);
            return;
        }

        if !has_finalizer(resource) {
            if let Err(e) = add_finalizer(&self.resources, resource).await {
                warn!(resource = %snapshot.key, error = %e, "Failed to add finalizer");
            }
        }
        self.scheduler.apply(snapshot).await;
    }

    fn start_teardown(&mut self, snapshot: SpecSnapshot, resource: &VaultSecret) {
        let uid = snapshot.uid.clone();
        if !has_finalizer(resource)
            || self.terminated.contains(&uid)
            || !self.tearing_down.insert(uid.clone())
        {
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let resources = self.resources.clone();
        let resource = resource.clone();
        self.teardowns.spawn(async move {
            let key = snapshot.key.clone();
            scheduler.delete(snapshot).await;
            match remove_finalizer(&resources, &resource).await {
                Ok(()) => {
                    debug!(resource = %key, "Removed finalizer");
                    (uid, true)
                }
                Err(e) => {
                    warn!(resource = %key, error = %e, "Failed to remove finalizer");
                    (uid, false)
                }
            }
        });
    }
}

fn has_finalizer(resource: &VaultSecret) -> bool {
    resource.finalizers().iter().any(|f| f == FINALIZER)
}

async fn add_finalizer(api: &Api<VaultSecret>, resource: &VaultSecret) -> Result<(), kube::Error> {
    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(api, resource, finalizers).await
}

async fn remove_finalizer(
    api: &Api<VaultSecret>,
    resource: &VaultSecret,
) -> Result<(), kube::Error> {
    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    match patch_finalizers(api, resource, finalizers).await {
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
        result => result,
    }
}

async fn patch_finalizers(
    api: &Api<VaultSecret>,
    resource: &VaultSecret,
    finalizers: Vec<String>,
) -> Result<(), kube::Error> {
    let namespace = resource.namespace().unwrap_or_default();
    let api = Api::<VaultSecret>::namespaced(api.clone().into_client(), &namespace);
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        &resource.name_any(),
        &PatchParams::apply(crate::constants::CONTROLLER_NAME),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
