//! # Sync Engine
//!
//! Runs one fetch/write cycle of the per-resource state machine and the
//! teardown on deletion.
//!
//! ```text
//! Pending -> Fetching -> Writing -> Scheduled -> Fetching ...
//!               |           |
//!               +-> Failed <+        any -> Terminated (deletion)
//! ```
//!
//! A cycle never sleeps. It returns a [`Wake`] telling the scheduler when the
//! next cycle is due, so retries and refreshes are plain transitions with
//! computed wake times.

use super::state::{SpecSlot, SyncState};
use super::types::{ErrorKind, ReconcilerError, SpecSnapshot, SyncPhase};
use super::validation::{validate, SourceRequest, ValidatedSpec};
use crate::backend::record::checked_after;
use crate::backend::{BackendError, CallContext, CredentialRecord, SecretBackend};
use crate::config::ControllerConfig;
use crate::controller::clock::Clock;
use crate::controller::destination::{
    DestinationTarget, DestinationWriter, WriteError, WriteResult,
};
use crate::controller::lease::{LeaseTracker, RefreshPlan};
use crate::controller::status::{StatusReporter, StatusUpdate, SyncEvent};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Knobs of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive fatal failures retried before parking
    pub max_fatal_retries: u32,
    /// Consecutive retryable failures before surfacing `Failed` (0 = unlimited)
    pub max_transient_retries: u32,
    /// Deadline of every backend call
    pub backend_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            backoff_base: config.backoff_start_duration(),
            backoff_max: config.backoff_max_duration(),
            max_fatal_retries: config.max_fatal_retries,
            max_transient_retries: config.max_transient_retries,
            backend_timeout: config.backend_timeout(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

/// When the worker should run its next cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    At(DateTime<Utc>),
    /// Only an edit, a forced resync or deletion wakes the worker
    Idle,
}

/// How the record of this cycle was obtained
enum Obtained {
    Fetched(CredentialRecord),
    Renewed(CredentialRecord),
    /// Fetched by an earlier cycle whose write failed
    Reused(CredentialRecord),
}

impl Obtained {
    fn into_record(self) -> CredentialRecord {
        match self {
            Obtained::Fetched(record) | Obtained::Renewed(record) | Obtained::Reused(record) => {
                record
            }
        }
    }
}

/// Drives the state machine of every resource
///
/// Shared by all workers; per-resource state lives in [`SyncState`] and
/// [`SpecSlot`], owned by the worker.
pub struct SyncEngine {
    backend: Arc<dyn SecretBackend>,
    writer: DestinationWriter,
    reporter: Arc<dyn StatusReporter>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("writer", &self.writer)
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        writer: DestinationWriter,
        reporter: Arc<dyn StatusReporter>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            backend,
            writer,
            reporter,
            clock,
            settings,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fresh state for a newly observed resource
    pub fn new_state(&self) -> SyncState {
        SyncState::new(self.settings.backoff_base, self.settings.backoff_max)
    }

    /// Run one cycle and return when the next one is due
    ///
    /// Errors never escape: they become state transitions, status and events.
    /// `cancel` aborts in-flight backend calls; a started write always completes.
    pub async fn run_cycle(
        &self,
        snapshot: &SpecSnapshot,
        state: &mut SyncState,
        slot: &SpecSlot,
        cancel: &CancellationToken,
    ) -> Wake {
        let span = info_span!(
            "controller.sync.cycle",
            resource.name = %snapshot.key.name,
            resource.namespace = %snapshot.key.namespace,
            generation = snapshot.generation,
        );
        self.cycle(snapshot, state, slot, cancel)
            .instrument(span)
            .await
    }

    async fn cycle(
        &self,
        snapshot: &SpecSnapshot,
        state: &mut SyncState,
        slot: &SpecSlot,
        cancel: &CancellationToken,
    ) -> Wake {
        if snapshot.spec.suspend {
            if state.phase != SyncPhase::Suspended {
                info!("VaultSecret suspended, skipping sync");
            }
            state.phase = SyncPhase::Suspended;
            self.report(snapshot, state, None, "Suspended", "Sync suspended by spec.suspend");
            return Wake::Idle;
        }
        if state.parked {
            debug!("VaultSecret parked after repeated failures, waiting for an edit");
            return Wake::Idle;
        }

        let validated = match validate(snapshot) {
            Ok(validated) => validated,
            Err(e) => return self.handle_failure(snapshot, state, e.into()),
        };

        let generation = slot.begin();
        let _guard = slot.lock().await;
        let started = Instant::now();

        match self
            .sync(snapshot, &validated, state, slot, generation, cancel)
            .await
        {
            Ok(wake) => {
                metrics::increment_syncs();
                metrics::observe_sync_duration(started.elapsed().as_secs_f64());
                wake
            }
            Err(e) => self.handle_failure(snapshot, state, e),
        }
    }

    async fn sync(
        &self,
        snapshot: &SpecSnapshot,
        validated: &ValidatedSpec,
        state: &mut SyncState,
        slot: &SpecSlot,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Wake, ReconcilerError> {
        let kind = validated.source.kind();
        let ctx = CallContext::new(self.settings.backend_timeout, cancel.clone());

        state.phase = SyncPhase::Fetching;
        let obtained = self.obtain(snapshot, validated, state, &ctx).await?;
        let fetched = matches!(obtained, Obtained::Fetched(_));
        let record = obtained.into_record();
        if record.is_empty() {
            return Err(ReconcilerError::EmptyResult);
        }
        if fetched {
            self.reporter.event(snapshot, SyncEvent::FetchSucceeded);
        }
        state.unwritten = Some(record.clone());

        state.phase = SyncPhase::Writing;
        let target = DestinationTarget {
            namespace: validated.destination_namespace.clone(),
            name: snapshot.spec.destination.name.clone(),
            create: snapshot.spec.destination.create,
            owner: snapshot.owner_reference(),
        };
        let Some(result) = self.write_record(&target, slot, generation, &record).await? else {
            debug!(generation, "Newer cycle already wrote the destination, discarding");
            state.unwritten = None;
            state.phase = SyncPhase::Scheduled;
            return Ok(self.schedule(validated, state));
        };

        if result.conflicts > 0 {
            self.reporter
                .event(snapshot, SyncEvent::WriteConflictRetried(result.conflicts));
        }
        if result.changed() {
            self.reporter.event(snapshot, SyncEvent::WriteSucceeded);
        }
        info!(
            destination = %format!("{}/{}", target.namespace, target.name),
            outcome = result.outcome.as_str(),
            source = kind.as_str(),
            "Synced VaultSecret"
        );

        state.record_success(record, self.clock.now());
        state.phase = SyncPhase::Scheduled;
        let wake = self.schedule(validated, state);
        let description = match wake {
            Wake::At(at) => format!("Synced, next refresh at {}", at.to_rfc3339()),
            Wake::Idle => "Synced, no scheduled refresh".to_string(),
        };
        self.report(snapshot, state, wake_time(wake), "Synced", &description);
        Ok(wake)
    }

    /// Renew, reuse or fetch the record this cycle writes
    async fn obtain(
        &self,
        snapshot: &SpecSnapshot,
        validated: &ValidatedSpec,
        state: &mut SyncState,
        ctx: &CallContext,
    ) -> Result<Obtained, ReconcilerError> {
        let now = self.clock.now();

        if let Some(record) = state.unwritten.take() {
            if record.expires_at.is_none_or(|expires_at| expires_at > now) {
                debug!("Reusing credential from the previous attempt");
                return Ok(Obtained::Reused(record));
            }
            debug!("Unwritten credential expired, fetching a new one");
        }

        if !state.needs_fetch {
            if let Some(record) = state.record.as_ref() {
                let plan = validated.tracker.plan(record, validated.source.kind());
                if let RefreshPlan::Renew { lease_id, .. } = plan {
                    if let Some(renewed) = self
                        .renew(snapshot, validated, record, &lease_id, ctx, now)
                        .await?
                    {
                        return Ok(Obtained::Renewed(renewed));
                    }
                }
            }
        }

        let record = match &validated.source {
            SourceRequest::Dynamic {
                mount,
                path,
                params,
            } => {
                self.backend
                    .fetch_dynamic(ctx, mount, path, params.as_ref())
                    .await?
            }
            SourceRequest::Kv {
                mount,
                path,
                kv_version,
            } => {
                self.backend
                    .read_static(ctx, mount, path, *kv_version)
                    .await?
            }
            SourceRequest::Pki {
                mount,
                role,
                common_name,
                params,
            } => {
                self.backend
                    .issue_certificate(ctx, mount, role, common_name, params)
                    .await?
            }
        };
        Ok(Obtained::Fetched(record))
    }

    /// Extend the active lease; `None` means a full fetch is required
    async fn renew(
        &self,
        snapshot: &SpecSnapshot,
        validated: &ValidatedSpec,
        record: &CredentialRecord,
        lease_id: &str,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<Option<CredentialRecord>, ReconcilerError> {
        let increment = validated.tracker.renewal_increment(record);
        match self.backend.renew_lease(ctx, lease_id, increment).await {
            Ok(renewal) if LeaseTracker::accepts_renewal(increment, &renewal) => {
                metrics::increment_lease_renewals("renewed");
                self.reporter.event(snapshot, SyncEvent::LeaseRenewed);
                debug!(
                    lease_id,
                    lease_duration = renewal.lease_duration.as_secs(),
                    "Renewed lease"
                );
                Ok(Some(record.renewed(&renewal, now)))
            }
            Ok(renewal) => {
                metrics::increment_lease_renewals("exhausted");
                info!(
                    lease_id,
                    lease_duration = renewal.lease_duration.as_secs(),
                    "Lease reached its maximum TTL, fetching a new credential"
                );
                Ok(None)
            }
            Err(e) if e == BackendError::Cancelled || e.is_retryable() => Err(e.into()),
            Err(e) => {
                metrics::increment_lease_renewals("rejected");
                warn!(lease_id, error = %e, "Lease renewal rejected, fetching a new credential");
                Ok(None)
            }
        }
    }

    /// Write `record` unless a newer cycle already committed
    ///
    /// Returns `None` when the write was discarded as stale. Must be called
    /// with the slot lock held.
    ///
    /// # Errors
    /// Returns the writer's error; the slot is not committed in that case
    pub async fn write_record(
        &self,
        target: &DestinationTarget,
        slot: &SpecSlot,
        generation: u64,
        record: &CredentialRecord,
    ) -> Result<Option<WriteResult>, WriteError> {
        if slot.is_stale(generation) {
            return Ok(None);
        }
        let result = self.writer.write(target, record).await?;
        slot.commit(generation);
        Ok(Some(result))
    }

    fn schedule(&self, validated: &ValidatedSpec, state: &SyncState) -> Wake {
        let Some(record) = state.record.as_ref() else {
            return Wake::Idle;
        };
        match validated
            .tracker
            .plan(record, validated.source.kind())
            .due_at()
        {
            Some(at) => Wake::At(at.max(self.clock.now())),
            None => Wake::Idle,
        }
    }

    fn handle_failure(
        &self,
        snapshot: &SpecSnapshot,
        state: &mut SyncState,
        error: ReconcilerError,
    ) -> Wake {
        let kind = error.kind();
        if kind == ErrorKind::Cancelled {
            debug!("Sync cancelled");
            return Wake::Idle;
        }

        metrics::increment_sync_errors(kind.as_str());
        let event = if state.phase == SyncPhase::Writing {
            SyncEvent::WriteFailed(kind)
        } else {
            SyncEvent::FetchFailed(kind)
        };
        self.reporter.event(snapshot, event);
        state.last_error = Some(kind);

        let now = self.clock.now();
        let retry_at = |state: &mut SyncState| {
            checked_after(now, state.backoff.next_backoff()).map_or(Wake::Idle, Wake::At)
        };

        let wake = if matches!(error, ReconcilerError::Validation(_)) {
            state.fatal_failures = state.fatal_failures.saturating_add(1);
            state.parked = true;
            Wake::Idle
        } else if kind.is_retryable() {
            state.transient_failures = state.transient_failures.saturating_add(1);
            let budget = self.settings.max_transient_retries;
            if budget > 0 && state.transient_failures >= budget {
                state.parked = true;
                Wake::Idle
            } else {
                retry_at(state)
            }
        } else {
            state.fatal_failures = state.fatal_failures.saturating_add(1);
            if state.fatal_failures > self.settings.max_fatal_retries {
                state.parked = true;
                Wake::Idle
            } else {
                retry_at(state)
            }
        };

        state.phase = if kind.is_retryable() && !state.parked {
            SyncPhase::Pending
        } else {
            SyncPhase::Failed
        };

        let description = match wake {
            Wake::At(at) => format!("{error}; retrying at {}", at.to_rfc3339()),
            Wake::Idle => format!("{error}; waiting for the VaultSecret to be edited"),
        };
        if state.parked {
            warn!(
                error = %error,
                kind = kind.as_str(),
                failures = state.consecutive_failures(),
                "Sync failed, automatic retries stopped"
            );
        } else {
            warn!(error = %error, kind = kind.as_str(), "Sync failed");
        }
        self.report(snapshot, state, wake_time(wake), kind.as_str(), &description);
        wake
    }

    /// Revoke the lease if asked to and delete an owned destination
    ///
    /// Best effort: failures are logged and teardown always reaches `Terminated`.
    pub async fn teardown(&self, snapshot: &SpecSnapshot, state: &mut SyncState, slot: &SpecSlot) {
        let span = info_span!(
            "controller.sync.teardown",
            resource.name = %snapshot.key.name,
            resource.namespace = %snapshot.key.namespace,
        );
        self.terminate(snapshot, state, slot).instrument(span).await;
    }

    async fn terminate(&self, snapshot: &SpecSnapshot, state: &mut SyncState, slot: &SpecSlot) {
        let _guard = slot.lock().await;
        let spec = &snapshot.spec;

        if spec.refresh.revoke_on_delete {
            // Without a worker (e.g. after a restart) the lease is only known from status
            let lease_id = state
                .active_lease_id()
                .or(snapshot.recorded_lease_id.as_deref());
            if let Some(lease_id) = lease_id {
                // The worker's token is already cancelled at this point
                let ctx = CallContext::new(self.settings.backend_timeout, CancellationToken::new());
                match self.backend.revoke_lease(&ctx, lease_id).await {
                    Ok(()) => {
                        info!(lease_id, "Revoked lease");
                        self.reporter.event(snapshot, SyncEvent::LeaseRevoked);
                    }
                    Err(e) => warn!(lease_id, error = %e, "Failed to revoke lease"),
                }
            }
        }

        if !spec.destination.name.trim().is_empty() {
            let target = DestinationTarget {
                namespace: spec
                    .destination
                    .namespace
                    .clone()
                    .filter(|ns| !ns.trim().is_empty())
                    .unwrap_or_else(|| snapshot.key.namespace.clone()),
                name: spec.destination.name.clone(),
                create: spec.destination.create,
                owner: snapshot.owner_reference(),
            };
            match self.writer.delete_if_owned(&target).await {
                Ok(true) => self.reporter.event(snapshot, SyncEvent::DestinationDeleted),
                Ok(false) => {}
                Err(e) => warn!(
                    destination = %format!("{}/{}", target.namespace, target.name),
                    error = %e,
                    "Failed to delete destination secret"
                ),
            }
        }

        state.phase = SyncPhase::Terminated;
        state.record = None;
        state.unwritten = None;
        self.report(snapshot, state, None, "Terminated", "VaultSecret deleted");
    }

    fn report(
        &self,
        snapshot: &SpecSnapshot,
        state: &SyncState,
        next_sync_time: Option<DateTime<Utc>>,
        reason: &str,
        description: &str,
    ) {
        let record = state.record.as_ref();
        let ready = matches!(state.phase, SyncPhase::Scheduled);
        let outcome = match (state.last_error, state.last_sync_time) {
            (Some(kind), _) => Some(kind.as_str().to_string()),
            (None, Some(_)) => Some("Success".to_string()),
            (None, None) => None,
        };
        self.reporter.report(
            snapshot,
            StatusUpdate {
                phase: state.phase,
                description: description.to_string(),
                ready,
                reason: reason.to_string(),
                outcome,
                last_sync_time: state.last_sync_time,
                next_sync_time,
                lease_id: record.and_then(CredentialRecord::lease_id).map(str::to_string),
                lease_duration_seconds: record
                    .and_then(|r| r.lease.as_ref())
                    .and_then(|lease| i64::try_from(lease.duration.as_secs()).ok()),
                certificate_serial: record.and_then(|r| r.serial_number.clone()),
                consecutive_failures: state.consecutive_failures(),
                observed_generation: snapshot.generation,
            },
        );
    }
}

fn wake_time(wake: Wake) -> Option<DateTime<Utc>> {
    match wake {
        Wake::At(at) => Some(at),
        Wake::Idle => None,
    }
}
