//! # Types
//!
//! Core types for the reconciler.

use crate::backend::BackendError;
use crate::constants::RESYNC_ANNOTATION;
use crate::controller::destination::WriteError;
use crate::controller::reconciler::validation::SpecValidationError;
use crate::crd::{VaultSecret, VaultSecretSpec};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use thiserror::Error;

/// Identity of a VaultSecret: `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecKey {
    pub namespace: String,
    pub name: String,
}

impl SpecKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SpecKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Everything a worker needs from one observed version of a VaultSecret
#[derive(Debug, Clone, PartialEq)]
pub struct SpecSnapshot {
    pub key: SpecKey,
    pub uid: String,
    pub generation: i64,
    pub spec: VaultSecretSpec,
    /// Value of the resync annotation
    pub resync_token: Option<String>,
    /// Lease id last published in status; survives controller restarts
    pub recorded_lease_id: Option<String>,
}

impl SpecSnapshot {
    /// Snapshot a resource; `None` when name, namespace or uid is missing
    pub fn from_resource(resource: &VaultSecret) -> Option<Self> {
        Some(Self {
            key: SpecKey::new(resource.namespace()?, resource.metadata.name.clone()?),
            uid: resource.metadata.uid.clone()?,
            generation: resource.metadata.generation.unwrap_or_default(),
            spec: resource.spec.clone(),
            resync_token: resource.annotations().get(RESYNC_ANNOTATION).cloned(),
            recorded_lease_id: resource
                .status
                .as_ref()
                .and_then(|status| status.lease_id.clone())
                .filter(|id| !id.is_empty()),
        })
    }

    /// Whether `next` must move the worker back to `Pending`
    ///
    /// True on a spec edit, a changed resync annotation, or a recreated
    /// resource. Status-only or label-only updates are not triggers.
    pub fn is_triggered_by(&self, next: &SpecSnapshot) -> bool {
        self.generation != next.generation
            || self.resync_token != next.resync_token
            || self.uid != next.uid
    }

    /// Owner reference placed on destinations created for this resource
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: VaultSecret::api_version(&()).to_string(),
            kind: VaultSecret::kind(&()).to_string(),
            name: self.key.name.clone(),
            uid: self.uid.clone(),
            ..OwnerReference::default()
        }
    }

    /// Reference used as the regarding object of events
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(VaultSecret::api_version(&()).to_string()),
            kind: Some(VaultSecret::kind(&()).to_string()),
            name: Some(self.key.name.clone()),
            namespace: Some(self.key.namespace.clone()),
            uid: Some(self.uid.clone()),
            ..ObjectReference::default()
        }
    }
}

/// Error classification shared by every layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    RateLimited,
    Unavailable,
    InvalidRequest,
    Cancelled,
    WriteConflict,
    EmptyResult,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::WriteConflict => "WriteConflict",
            ErrorKind::EmptyResult => "EmptyResult",
        }
    }

    /// Retried transparently with backoff, without a fatal attempt budget
    ///
    /// `WriteConflict` is retried inside the writer first; once that bound is
    /// exhausted it counts against the fatal budget like other failures.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Unavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("invalid VaultSecret: {0}")]
    Validation(#[from] SpecValidationError),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("destination: {0}")]
    Write(#[from] WriteError),
    #[error("backend returned no data")]
    EmptyResult,
}

impl ReconcilerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcilerError::Validation(_) => ErrorKind::InvalidRequest,
            ReconcilerError::Backend(e) => e.kind(),
            ReconcilerError::Write(e) => e.kind(),
            ReconcilerError::EmptyResult => ErrorKind::EmptyResult,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Phase of the per-resource state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Pending,
    Fetching,
    Writing,
    Scheduled,
    Failed,
    Suspended,
    Terminated,
}

impl SyncPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Pending => "Pending",
            SyncPhase::Fetching => "Fetching",
            SyncPhase::Writing => "Writing",
            SyncPhase::Scheduled => "Scheduled",
            SyncPhase::Failed => "Failed",
            SyncPhase::Suspended => "Suspended",
            SyncPhase::Terminated => "Terminated",
        }
    }
}
