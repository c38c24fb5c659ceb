//! # VaultSecret Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};

/// VaultSecret Custom Resource Definition
///
/// Declares which secret to read from Vault and which Kubernetes Secret to
/// keep in sync with it.
///
/// # Example
///
/// ```yaml
/// apiVersion: vault-secrets.octopilot.io/v1beta1
/// kind: VaultSecret
/// metadata:
///   name: db-creds
///   namespace: apps
/// spec:
///   source:
///     type: dynamic
///     mount: database
///     path: creds/readonly
///   destination:
///     name: db-creds
///     create: true
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "VaultSecret",
    group = "vault-secrets.octopilot.io",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::VaultSecretStatus",
    shortname = "vs",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.source.type"}, {"name":"Destination", "type":"string", "jsonPath":".spec.destination.name"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Next Sync", "type":"string", "jsonPath":".status.nextSyncTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretSpec {
    /// Vault source of the secret material
    pub source: crate::crd::SecretSource,
    /// Kubernetes Secret receiving the material
    pub destination: crate::crd::DestinationConfig,
    /// Renewal and refresh policy
    #[serde(default)]
    pub refresh: crate::crd::RefreshPolicy,
    /// Suspend syncing
    /// When true, the controller skips sync cycles and leaves the destination untouched
    /// Default: false
    #[serde(default = "default_false")]
    pub suspend: bool,
}

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}

/// Default value for boolean false
pub fn default_false() -> bool {
    false
}
