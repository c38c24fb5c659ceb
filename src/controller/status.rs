//! # Event / Status Reporter
//!
//! Surfaces sync outcomes on the `VaultSecret` status subresource and as
//! Kubernetes Events. Reporting never fails a sync: errors are logged and
//! dropped.

use crate::constants::CONTROLLER_NAME;
use crate::controller::reconciler::{ErrorKind, SpecKey, SpecSnapshot, SyncPhase};
use crate::crd::{Condition, VaultSecret, VaultSecretStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Transition surfaced as a Kubernetes Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    FetchSucceeded,
    FetchFailed(ErrorKind),
    WriteSucceeded,
    WriteFailed(ErrorKind),
    /// Conflicts resolved by reloading the destination
    WriteConflictRetried(u32),
    DestinationDeleted,
    LeaseRenewed,
    LeaseRevoked,
}

impl SyncEvent {
    pub fn reason(&self) -> &'static str {
        match self {
            SyncEvent::FetchSucceeded => "FetchSucceeded",
            SyncEvent::FetchFailed(_) => "FetchFailed",
            SyncEvent::WriteSucceeded => "WriteSucceeded",
            SyncEvent::WriteFailed(_) => "WriteFailed",
            SyncEvent::WriteConflictRetried(_) => "WriteConflictRetried",
            SyncEvent::DestinationDeleted => "DestinationDeleted",
            SyncEvent::LeaseRenewed => "LeaseRenewed",
            SyncEvent::LeaseRevoked => "LeaseRevoked",
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, SyncEvent::FetchFailed(_) | SyncEvent::WriteFailed(_))
    }

    fn note(&self) -> String {
        match self {
            SyncEvent::FetchSucceeded => "Fetched secret material from Vault".to_string(),
            SyncEvent::FetchFailed(kind) => format!("Fetching from Vault failed: {kind}"),
            SyncEvent::WriteSucceeded => "Destination secret updated".to_string(),
            SyncEvent::WriteFailed(kind) => format!("Writing destination secret failed: {kind}"),
            SyncEvent::WriteConflictRetried(n) => {
                format!("Destination secret changed concurrently, retried {n} time(s)")
            }
            SyncEvent::DestinationDeleted => "Deleted destination secret".to_string(),
            SyncEvent::LeaseRenewed => "Renewed Vault lease".to_string(),
            SyncEvent::LeaseRevoked => "Revoked Vault lease".to_string(),
        }
    }
}

/// Snapshot of a resource's sync state for the status subresource
///
/// Carries lease ids and serials, never secret material.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub phase: SyncPhase,
    pub description: String,
    pub ready: bool,
    /// `Synced` on success, otherwise the error kind
    pub reason: String,
    pub outcome: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub next_sync_time: Option<DateTime<Utc>>,
    pub lease_id: Option<String>,
    pub lease_duration_seconds: Option<i64>,
    pub certificate_serial: Option<String>,
    pub consecutive_failures: u32,
    pub observed_generation: i64,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl StatusUpdate {
    /// Render as the status subresource; `transition_time` is when `Ready` last flipped
    pub fn to_status(&self, transition_time: DateTime<Utc>) -> VaultSecretStatus {
        VaultSecretStatus {
            phase: Some(self.phase.as_str().to_string()),
            description: Some(self.description.clone()),
            conditions: vec![Condition {
                r#type: "Ready".to_string(),
                status: if self.ready { "True" } else { "False" }.to_string(),
                last_transition_time: Some(rfc3339(transition_time)),
                reason: Some(self.reason.clone()),
                message: Some(self.description.clone()),
            }],
            observed_generation: Some(self.observed_generation),
            last_sync_time: self.last_sync_time.map(rfc3339),
            last_sync_outcome: self.outcome.clone(),
            next_sync_time: self.next_sync_time.map(rfc3339),
            lease_id: self.lease_id.clone(),
            lease_duration_seconds: self.lease_duration_seconds,
            certificate_serial: self.certificate_serial.clone(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Sink for status updates and events
pub trait StatusReporter: Send + Sync {
    fn report(&self, spec: &SpecSnapshot, update: StatusUpdate);
    fn event(&self, spec: &SpecSnapshot, event: SyncEvent);
}

enum Message {
    Status {
        key: SpecKey,
        update: StatusUpdate,
    },
    Event {
        reference: ObjectReference,
        event: SyncEvent,
    },
}

/// Reporter writing to the Kubernetes API from a background task
///
/// Workers only enqueue; API latency and failures never reach them.
#[derive(Clone)]
pub struct KubeStatusReporter {
    tx: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for KubeStatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusReporter").finish_non_exhaustive()
    }
}

impl KubeStatusReporter {
    /// Start the background task; it ends when every reporter clone is dropped
    pub fn spawn(client: Client) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_reporter(client, rx));
        (Self { tx }, handle)
    }
}

impl StatusReporter for KubeStatusReporter {
    fn report(&self, spec: &SpecSnapshot, update: StatusUpdate) {
        let message = Message::Status {
            key: spec.key.clone(),
            update,
        };
        if self.tx.send(message).is_err() {
            debug!(resource = %spec.key, "Status reporter stopped, dropping status update");
        }
    }

    fn event(&self, spec: &SpecSnapshot, event: SyncEvent) {
        let message = Message::Event {
            reference: spec.object_reference(),
            event,
        };
        if self.tx.send(message).is_err() {
            debug!(resource = %spec.key, "Status reporter stopped, dropping event");
        }
    }
}

async fn run_reporter(client: Client, mut rx: mpsc::UnboundedReceiver<Message>) {
    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        },
    );
    // Last Ready value and when it flipped, per resource
    let mut ready_since: HashMap<SpecKey, (bool, DateTime<Utc>)> = HashMap::new();

    while let Some(message) = rx.recv().await {
        match message {
            Message::Status { key, update } => {
                let now = Utc::now();
                let transition = match ready_since.get(&key) {
                    Some((ready, since)) if *ready == update.ready => *since,
                    _ => now,
                };
                if update.phase == SyncPhase::Terminated {
                    ready_since.remove(&key);
                } else {
                    ready_since.insert(key.clone(), (update.ready, transition));
                }
                patch_status(&client, &key, &update.to_status(transition)).await;
            }
            Message::Event { reference, event } => {
                let ev = Event {
                    type_: if event.is_warning() {
                        EventType::Warning
                    } else {
                        EventType::Normal
                    },
                    reason: event.reason().to_string(),
                    note: Some(event.note()),
                    action: "Sync".to_string(),
                    secondary: None,
                };
                if let Err(e) = recorder.publish(&ev, &reference).await {
                    warn!(
                        resource.name = reference.name.as_deref().unwrap_or("unknown"),
                        resource.namespace = reference.namespace.as_deref().unwrap_or("unknown"),
                        reason = event.reason(),
                        error = %e,
                        "Failed to publish event"
                    );
                }
            }
        }
    }
}

async fn patch_status(client: &Client, key: &SpecKey, status: &VaultSecretStatus) {
    let api: Api<VaultSecret> = Api::namespaced(client.clone(), &key.namespace);
    let patch = serde_json::json!({ "status": status });
    match api
        .patch_status(
            &key.name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(patch),
        )
        .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            // Resource was deleted during reconciliation - this is expected and not an error
            debug!(resource = %key, "VaultSecret deleted, skipping status update");
        }
        Err(e) => {
            warn!(resource = %key, error = %e, "Failed to patch VaultSecret status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_rendering() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let update = StatusUpdate {
            phase: SyncPhase::Scheduled,
            description: "Synced, next refresh scheduled".to_string(),
            ready: true,
            reason: "Synced".to_string(),
            outcome: Some("Success".to_string()),
            last_sync_time: Some(at),
            next_sync_time: Some(at + chrono::Duration::seconds(2_412)),
            lease_id: Some("database/creds/readonly/abc".to_string()),
            lease_duration_seconds: Some(3_600),
            certificate_serial: None,
            consecutive_failures: 0,
            observed_generation: 3,
        };
        let status = update.to_status(at);
        assert_eq!(status.phase.as_deref(), Some("Scheduled"));
        assert_eq!(status.last_sync_time.as_deref(), Some("2023-11-14T22:13:20Z"));
        assert_eq!(status.next_sync_time.as_deref(), Some("2023-11-14T22:53:32Z"));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.observed_generation, Some(3));
    }

    #[test]
    fn test_failure_events_are_warnings() {
        assert!(SyncEvent::FetchFailed(ErrorKind::NotFound).is_warning());
        assert!(SyncEvent::WriteFailed(ErrorKind::WriteConflict).is_warning());
        assert!(!SyncEvent::WriteConflictRetried(1).is_warning());
        assert_eq!(SyncEvent::LeaseRevoked.reason(), "LeaseRevoked");
    }
}
