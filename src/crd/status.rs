//! # VaultSecret Status
//!
//! Status types for tracking sync state and conditions.

use serde::{Deserialize, Serialize};

/// Status of the VaultSecret resource
///
/// Never carries secret material: only lease ids, serials and timestamps.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretStatus {
    /// Current phase of the sync state machine
    /// Values: Pending, Fetching, Writing, Scheduled, Failed, Suspended, Terminated
    #[serde(default)]
    pub phase: Option<String>,
    /// Human-readable description of current state
    #[serde(default)]
    pub description: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last sync attempt time (RFC3339)
    #[serde(default)]
    pub last_sync_time: Option<String>,
    /// Outcome of the last sync attempt: "Success" or the error kind
    #[serde(default)]
    pub last_sync_outcome: Option<String>,
    /// Next scheduled sync attempt (RFC3339)
    #[serde(default)]
    pub next_sync_time: Option<String>,
    /// Vault lease id of the active credential
    #[serde(default)]
    pub lease_id: Option<String>,
    /// Lease duration in seconds as reported by Vault
    #[serde(default)]
    pub lease_duration_seconds: Option<i64>,
    /// Serial number of the active certificate
    #[serde(default)]
    pub certificate_serial: Option<String>,
    /// Consecutive failed attempts since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}
