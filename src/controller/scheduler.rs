//! # Scheduler
//!
//! One worker task per VaultSecret, keyed by `namespace/name`, over a bounded
//! pool of cycle permits.
//!
//! A worker waits for whichever comes first: the wake time of its last cycle,
//! a triggering update (edit or forced resync), or cancellation. Only a
//! cycle holds a permit; waiting workers cost nothing.
//!
//! Deleting a resource cancels the worker's in-flight backend call and its
//! wait, then runs the teardown before [`SyncScheduler::delete`] returns.

use crate::controller::reconciler::{SpecKey, SpecSlot, SpecSnapshot, SyncEngine, Wake};
use crate::observability::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct WorkerHandle {
    updates: watch::Sender<SpecSnapshot>,
    cancel: CancellationToken,
    /// Set before cancelling when the worker must tear down on exit
    deleting: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Per-resource work queue entries processed by a bounded pool
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    permits: Arc<Semaphore>,
    workers: AsyncMutex<HashMap<SpecKey, WorkerHandle>>,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, max_concurrent: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            workers: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Observe a created or updated resource
    ///
    /// Starts a worker on first sight. For a running worker, only an edit, a
    /// changed resync annotation or a recreated resource wakes it.
    pub async fn apply(&self, snapshot: SpecSnapshot) {
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get(&snapshot.key) {
            if !handle.task.is_finished() {
                let key = snapshot.key.clone();
                let triggered = handle.updates.send_if_modified(|current| {
                    let triggered = current.is_triggered_by(&snapshot);
                    *current = snapshot;
                    triggered
                });
                if triggered {
                    debug!(resource = %key, "VaultSecret changed, resyncing");
                }
                return;
            }
        }

        let key = snapshot.key.clone();
        info!(resource = %key, "Starting worker");
        let handle = self.spawn_worker(snapshot);
        workers.insert(key, handle);
        metrics::set_managed_specs(workers.len() as i64);
    }

    /// Tear down a deleted resource and wait for it to finish
    ///
    /// Works without a running worker too (e.g. after a controller restart),
    /// so owned destinations are still cleaned up.
    pub async fn delete(&self, snapshot: SpecSnapshot) {
        let handle = {
            let mut workers = self.workers.lock().await;
            let handle = workers.remove(&snapshot.key);
            metrics::set_managed_specs(workers.len() as i64);
            handle
        };

        match handle {
            Some(handle) => {
                handle.deleting.store(true, Ordering::SeqCst);
                handle.updates.send_replace(snapshot.clone());
                handle.cancel.cancel();
                if let Err(e) = handle.task.await {
                    warn!(resource = %snapshot.key, error = %e, "Worker task failed during teardown");
                }
            }
            None => {
                let mut state = self.engine.new_state();
                let slot = SpecSlot::new();
                self.engine.teardown(&snapshot, &mut state, &slot).await;
            }
        }
        info!(resource = %snapshot.key, "VaultSecret torn down");
    }

    /// Stop a worker without teardown (resource already gone)
    pub async fn forget(&self, key: &SpecKey) {
        let handle = {
            let mut workers = self.workers.lock().await;
            let handle = workers.remove(key);
            metrics::set_managed_specs(workers.len() as i64);
            handle
        };
        if let Some(handle) = handle {
            stop(handle).await;
            debug!(resource = %key, "Stopped worker");
        }
    }

    /// Stop every worker whose resource is not in `keys`
    ///
    /// Used after a watch relist to drop resources that vanished meanwhile.
    pub async fn retain(&self, keys: &HashSet<SpecKey>) {
        let stale: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().await;
            let gone: Vec<SpecKey> = workers
                .keys()
                .filter(|key| !keys.contains(*key))
                .cloned()
                .collect();
            let stale = gone.iter().filter_map(|key| workers.remove(key)).collect();
            metrics::set_managed_specs(workers.len() as i64);
            stale
        };
        if !stale.is_empty() {
            info!(count = stale.len(), "Stopping workers of vanished VaultSecrets");
        }
        for handle in stale {
            stop(handle).await;
        }
    }

    /// Stop every worker without teardown
    pub async fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().await;
            workers.drain().map(|(_, handle)| handle).collect()
        };
        metrics::set_managed_specs(0);
        for handle in handles {
            stop(handle).await;
        }
    }

    /// Keys of the running workers
    pub async fn keys(&self) -> Vec<SpecKey> {
        let workers = self.workers.lock().await;
        let mut keys: Vec<SpecKey> = workers.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn spawn_worker(&self, snapshot: SpecSnapshot) -> WorkerHandle {
        let (updates, rx) = watch::channel(snapshot);
        let cancel = CancellationToken::new();
        let deleting = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_worker(
            Arc::clone(&self.engine),
            Arc::clone(&self.permits),
            rx,
            cancel.clone(),
            Arc::clone(&deleting),
        ));
        WorkerHandle {
            updates,
            cancel,
            deleting,
            task,
        }
    }
}

async fn stop(handle: WorkerHandle) {
    handle.cancel.cancel();
    if let Err(e) = handle.task.await {
        warn!(error = %e, "Worker task failed");
    }
}

async fn run_worker(
    engine: Arc<SyncEngine>,
    permits: Arc<Semaphore>,
    mut updates: watch::Receiver<SpecSnapshot>,
    cancel: CancellationToken,
    deleting: Arc<AtomicBool>,
) {
    let mut state = engine.new_state();
    let slot = SpecSlot::new();
    let mut due = true;
    let mut wake = Wake::Idle;

    loop {
        if !due {
            let sleep = match wake {
                Wake::At(at) => Some(
                    (at - engine.clock().now())
                        .to_std()
                        .unwrap_or(Duration::ZERO),
                ),
                Wake::Idle => None,
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    state.mark_pending();
                }
                () = sleep_for(sleep) => {}
            }
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let snapshot = updates.borrow_and_update().clone();
        wake = engine.run_cycle(&snapshot, &mut state, &slot, &cancel).await;
        drop(permit);
        due = false;
    }

    if deleting.load(Ordering::SeqCst) {
        let snapshot = updates.borrow().clone();
        engine.teardown(&snapshot, &mut state, &slot).await;
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
