//! Vault Secrets Controller Library
//!
//! Reconciliation core of a Kubernetes controller that keeps Secrets in sync
//! with dynamic secrets, PKI certificates and KV secrets held in Vault.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use vault_secrets_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod backend;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
