//! # Destination Configuration

use serde::{Deserialize, Serialize};

/// Kubernetes Secret receiving the synced material
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    /// Secret name
    pub name: String,
    /// Secret namespace (defaults to the VaultSecret namespace)
    #[serde(default)]
    pub namespace: Option<String>,
    /// Create and own the Secret
    /// When true, the controller creates the Secret with owner labels and an owner
    /// reference, and deletes it when the VaultSecret is deleted.
    /// When false, the Secret must already exist and is never labelled or deleted.
    /// Default: true
    #[serde(default = "crate::crd::default_true")]
    pub create: bool,
}
