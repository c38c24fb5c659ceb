//! # Sync State
//!
//! Per-resource state owned by its worker, and the slot that orders writes
//! across cycles.

use super::types::{ErrorKind, SyncPhase};
use crate::backend::CredentialRecord;
use crate::controller::backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

/// State of one resource's state machine
#[derive(Debug, Clone)]
pub struct SyncState {
    pub phase: SyncPhase,
    /// Last record written to the destination
    pub record: Option<CredentialRecord>,
    /// Record fetched but not yet written; reused by the next attempt so a
    /// failed write does not leak a fresh lease per retry
    pub unwritten: Option<CredentialRecord>,
    /// Set on first observation, spec edit or forced resync
    pub needs_fetch: bool,
    pub backoff: ExponentialBackoff,
    pub fatal_failures: u32,
    pub transient_failures: u32,
    /// Automatic retries stopped until an edit or resync
    pub parked: bool,
    pub last_error: Option<ErrorKind>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            phase: SyncPhase::Pending,
            record: None,
            unwritten: None,
            needs_fetch: true,
            backoff: ExponentialBackoff::new(backoff_base, backoff_max),
            fatal_failures: 0,
            transient_failures: 0,
            parked: false,
            last_error: None,
            last_sync_time: None,
        }
    }

    /// Move back to `Pending` after an edit or forced resync
    pub fn mark_pending(&mut self) {
        self.phase = SyncPhase::Pending;
        self.needs_fetch = true;
        self.unwritten = None;
        self.parked = false;
        self.fatal_failures = 0;
        self.transient_failures = 0;
        self.backoff.reset();
    }

    pub fn record_success(&mut self, record: CredentialRecord, at: DateTime<Utc>) {
        self.record = Some(record);
        self.unwritten = None;
        self.needs_fetch = false;
        self.fatal_failures = 0;
        self.transient_failures = 0;
        self.parked = false;
        self.last_error = None;
        self.last_sync_time = Some(at);
        self.backoff.reset();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.fatal_failures.saturating_add(self.transient_failures)
    }

    /// Lease id of the newest credential held, written or not
    pub fn active_lease_id(&self) -> Option<&str> {
        self.unwritten
            .as_ref()
            .and_then(CredentialRecord::lease_id)
            .or_else(|| self.record.as_ref().and_then(CredentialRecord::lease_id))
    }
}

/// Mutual exclusion and write ordering for one resource
///
/// Each cycle takes a generation when it starts. A write is discarded when a
/// newer generation has already committed.
#[derive(Debug, Default)]
pub struct SpecSlot {
    lock: AsyncMutex<()>,
    started: AtomicU64,
    committed: AtomicU64,
}

impl SpecSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held for the whole fetch and write of a cycle
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Take the next generation
    pub fn begin(&self) -> u64 {
        self.started.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a newer generation than `generation` has committed
    pub fn is_stale(&self, generation: u64) -> bool {
        self.committed.load(Ordering::SeqCst) > generation
    }

    pub fn commit(&self, generation: u64) {
        self.committed.fetch_max(generation, Ordering::SeqCst);
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generations_are_monotonic() {
        let slot = SpecSlot::new();
        let first = slot.begin();
        let second = slot.begin();
        assert!(second > first);

        slot.commit(second);
        assert!(slot.is_stale(first));
        assert!(!slot.is_stale(second));

        // Committing an older generation never moves the mark back
        slot.commit(first);
        assert_eq!(slot.committed(), second);
    }

    #[test]
    fn test_mark_pending_clears_failures() {
        let mut state = SyncState::new(Duration::from_secs(1), Duration::from_secs(60));
        state.fatal_failures = 6;
        state.parked = true;
        state.needs_fetch = false;
        state.backoff.next_backoff();
        state.mark_pending();
        assert_eq!(state.phase, SyncPhase::Pending);
        assert!(state.needs_fetch);
        assert!(!state.parked);
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.backoff.attempts(), 0);
    }
}
