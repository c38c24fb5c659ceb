//! # Lease / Expiry Tracker
//!
//! Computes when a credential must be refreshed and how: renew the lease in
//! place, fetch a new credential, or issue a new certificate.
//!
//! `renewAt = issuedAt + fraction * (expiresAt - issuedAt)`. A `renewAt` at or
//! before now means the refresh is due immediately.

use crate::backend::record::checked_after;
use crate::backend::{CredentialRecord, LeaseRenewal};
use crate::crd::SourceType;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What the worker does next for a synced credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshPlan {
    /// Nothing scheduled; wait for an edit or forced resync
    Idle,
    /// Extend the active lease
    Renew {
        at: DateTime<Utc>,
        lease_id: String,
    },
    /// Fetch a new credential
    Refetch { at: DateTime<Utc> },
    /// Issue a new certificate
    Reissue { at: DateTime<Utc> },
}

impl RefreshPlan {
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RefreshPlan::Idle => None,
            RefreshPlan::Renew { at, .. }
            | RefreshPlan::Refetch { at }
            | RefreshPlan::Reissue { at } => Some(*at),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at().is_some_and(|at| at <= now)
    }
}

/// Refresh calculator for one VaultSecret's policy
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseTracker {
    fraction: f64,
    refresh_after: Option<Duration>,
    max_lease_ttl: Option<Duration>,
}

impl LeaseTracker {
    /// `fraction` must already be validated to lie in `(0, 1]`
    pub fn new(
        fraction: f64,
        refresh_after: Option<Duration>,
        max_lease_ttl: Option<Duration>,
    ) -> Self {
        Self {
            fraction: fraction.clamp(f64::MIN_POSITIVE, 1.0),
            refresh_after,
            max_lease_ttl,
        }
    }

    /// Point in the validity window at which the credential is refreshed
    pub fn renew_at(&self, record: &CredentialRecord) -> Option<DateTime<Utc>> {
        let expires_at = record.expires_at?;
        let window = (expires_at - record.issued_at).num_milliseconds().max(0);
        let offset = (window as f64 * self.fraction).round() as i64;
        record
            .issued_at
            .checked_add_signed(chrono::Duration::milliseconds(offset))
    }

    /// Plan the next refresh of `record`
    pub fn plan(&self, record: &CredentialRecord, kind: SourceType) -> RefreshPlan {
        match kind {
            SourceType::Pki => self
                .renew_at(record)
                .map_or(RefreshPlan::Idle, |at| RefreshPlan::Reissue { at }),
            // A refresh point past the representable range never comes
            SourceType::Kv => match (self.refresh_after, self.renew_at(record)) {
                (Some(after), _) => checked_after(record.issued_at, after)
                    .map_or(RefreshPlan::Idle, |at| RefreshPlan::Refetch { at }),
                (None, Some(at)) => RefreshPlan::Refetch { at },
                (None, None) => RefreshPlan::Idle,
            },
            SourceType::Dynamic => {
                let Some(at) = self.renew_at(record) else {
                    return RefreshPlan::Idle;
                };
                match &record.lease {
                    Some(lease) if lease.renewable && self.within_budget(record, at) => {
                        RefreshPlan::Renew {
                            at,
                            lease_id: lease.id.clone(),
                        }
                    }
                    _ => RefreshPlan::Refetch { at },
                }
            }
        }
    }

    /// Increment requested when renewing: the lease's own duration
    pub fn renewal_increment(&self, record: &CredentialRecord) -> Option<Duration> {
        record
            .lease
            .as_ref()
            .map(|lease| lease.duration)
            .filter(|duration| !duration.is_zero())
    }

    /// Whether a renewal left the lease usable
    ///
    /// A zero duration, or a duration shorter than requested, means the lease
    /// has hit its maximum TTL and the credential must be fetched again.
    pub fn accepts_renewal(requested: Option<Duration>, renewal: &LeaseRenewal) -> bool {
        !renewal.lease_duration.is_zero()
            && requested.is_none_or(|requested| renewal.lease_duration >= requested)
    }

    fn within_budget(&self, record: &CredentialRecord, at: DateTime<Utc>) -> bool {
        let (Some(max), Some(lease)) = (self.max_lease_ttl, record.lease.as_ref()) else {
            return true;
        };
        checked_after(lease.first_issued_at, max).is_none_or(|end| at < end)
    }
}
