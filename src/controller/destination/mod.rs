//! # Destination Secret Writer
//!
//! Idempotent create/update of the destination Kubernetes Secret.
//!
//! - `store.rs` - `SecretStore` abstraction over the Secret API
//! - `writer.rs` - Content comparison, ownership rules and conflict retries

mod store;
mod writer;

pub use store::{KubeSecretStore, SecretStore, StoreError};
pub use writer::{
    build_data, DestinationTarget, DestinationWriter, WriteError, WriteOutcome, WriteResult,
};
