//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use vault_secrets_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (VaultSecret, SecretSource, etc.)
//! - The backend trait and its record types
//! - Reconciler, scheduler and reporter types
//! - Config types (ControllerConfig, ServerConfig, VaultConfig)

// CRD types - most commonly used
pub use crate::crd::*;

// Backend - trait, records and the Vault implementation
pub use crate::backend::{
    BackendError, CallContext, CredentialRecord, Lease, LeaseRenewal, SecretBackend, VaultClient,
};

// Reconciler types - core controller functionality
pub use crate::controller::clock::{Clock, ManualClock, SystemClock};
pub use crate::controller::destination::{
    DestinationTarget, DestinationWriter, KubeSecretStore, SecretStore, WriteError,
};
pub use crate::controller::lease::{LeaseTracker, RefreshPlan};
pub use crate::controller::reconciler::{
    EngineSettings, ErrorKind, ReconcilerError, SpecKey, SpecSlot, SpecSnapshot, SyncEngine,
    SyncPhase, SyncState, Wake,
};
pub use crate::controller::scheduler::SyncScheduler;
pub use crate::controller::status::{KubeStatusReporter, StatusReporter, StatusUpdate, SyncEvent};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ServerConfig, VaultConfig};
