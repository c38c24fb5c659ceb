//! # Custom Resource Definitions
//!
//! CRD types for the Vault Secrets Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The `VaultSecret` resource and its top-level spec
//! - `source.rs` - Where secret material is read from (dynamic, pki, kv)
//! - `destination.rs` - The Kubernetes Secret the material is written to
//! - `refresh.rs` - Lease renewal and refresh policy
//! - `status.rs` - Status types for tracking sync state

mod destination;
mod refresh;
mod source;
mod spec;
mod status;

// Re-export all public types
pub use destination::DestinationConfig;
pub use refresh::RefreshPolicy;
pub use source::{SecretSource, SourceType};
pub use spec::{VaultSecret, VaultSecretSpec, default_false, default_true};
pub use status::{Condition, VaultSecretStatus};
