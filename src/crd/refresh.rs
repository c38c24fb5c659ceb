//! # Refresh Policy

use serde::{Deserialize, Serialize};

/// Renewal and refresh policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPolicy {
    /// Fraction of a credential's validity window after which it is refreshed
    /// Must be in (0, 1]
    /// Default: 0.67
    #[serde(default = "default_renewal_window_fraction")]
    pub renewal_window_fraction: f64,
    /// Re-read interval for static (kv) secrets as a Kubernetes duration
    /// If not set, static secrets are only re-read on edit or forced resync
    #[serde(default)]
    pub refresh_after: Option<String>,
    /// Renewal budget for leased secrets, measured from the original issuance
    /// Once exhausted the credential is fetched again instead of renewed
    #[serde(default)]
    pub max_lease_ttl: Option<String>,
    /// Revoke the active lease when the VaultSecret is deleted
    /// Default: false
    #[serde(default = "crate::crd::default_false")]
    pub revoke_on_delete: bool,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            renewal_window_fraction: default_renewal_window_fraction(),
            refresh_after: None,
            max_lease_ttl: None,
            revoke_on_delete: false,
        }
    }
}

fn default_renewal_window_fraction() -> f64 {
    crate::constants::DEFAULT_RENEWAL_WINDOW_FRACTION
}
