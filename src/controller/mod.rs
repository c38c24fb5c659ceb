//! # Controller
//!
//! Core controller modules for the Vault Secrets Controller.
//!
//! - `backoff`: Exponential backoff with full jitter for retries
//! - `clock`: Injected time source
//! - `destination`: Destination Secret writer
//! - `lease`: Lease/expiry tracking and refresh planning
//! - `reconciler`: Per-resource sync state machine
//! - `scheduler`: Per-resource workers over a bounded pool
//! - `server`: HTTP server for metrics and health checks
//! - `status`: Status subresource and event reporting

pub mod backoff;
pub mod clock;
pub mod destination;
pub mod lease;
pub mod reconciler;
pub mod scheduler;
pub mod server;
pub mod status;
