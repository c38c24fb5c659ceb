//! # Reconciler
//!
//! Per-resource state machine for `VaultSecret` resources.
//!
//! The reconciler:
//! - Validates the VaultSecret before any backend call
//! - Fetches, renews or reissues the credential through the secret backend
//! - Writes the destination Secret, skipping unchanged writes
//! - Computes the next refresh from the lease tracker
//! - Reports status and events for every transition
//!
//! ## Reconciliation Flow
//!
//! 1. Validate the spec (`validation`)
//! 2. Take a generation and the per-resource lock (`state`)
//! 3. Reuse, renew or fetch the credential (`engine`)
//! 4. Write the destination unless a newer generation already did
//! 5. Schedule the next cycle and update status

pub mod engine;
pub mod state;
pub mod types;
pub mod validation;

// Re-export public API
pub use engine::{EngineSettings, SyncEngine, Wake};
pub use state::{SpecSlot, SyncState};
pub use types::{ErrorKind, ReconcilerError, SpecKey, SpecSnapshot, SyncPhase};
pub use validation::{parse_kubernetes_duration, validate, SpecValidationError};
