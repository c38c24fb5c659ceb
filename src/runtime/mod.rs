//! # Runtime
//!
//! Process-level wiring of the controller.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server and component setup
//! - `watch_loop`: `VaultSecret` watch feeding the scheduler, finalizer handling
//! - `error_policy`: Watch stream error classification and restart backoff

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
