//! # Secret Source
//!
//! Where the secret material is read from.

use schemars::{Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

/// Kind of Vault secret engine the source talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Leased dynamic credentials (database, aws, ...)
    Dynamic,
    /// Certificates issued by the PKI engine
    Pki,
    /// Static key/value secrets
    Kv,
}

impl SourceType {
    /// Lowercase name used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Dynamic => "dynamic",
            SourceType::Pki => "pki",
            SourceType::Kv => "kv",
        }
    }
}

/// Vault source configuration
///
/// Flat structure discriminated by `type` so the generated schema stays
/// structural. Field combinations are checked by the controller before any
/// backend call is made.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    /// Secret engine kind: dynamic, pki or kv
    pub r#type: SourceType,
    /// Mount path of the secret engine (e.g. "database", "pki", "secret")
    pub mount: String,
    /// Path below the mount (dynamic and kv)
    /// Example: "creds/readonly"
    #[serde(default)]
    pub path: Option<String>,
    /// Extra request parameters sent with the request (dynamic and pki)
    #[serde(default)]
    #[schemars(schema_with = "params_schema")]
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
    /// PKI role used to issue certificates
    #[serde(default)]
    pub role: Option<String>,
    /// PKI certificate common name
    #[serde(default)]
    pub common_name: Option<String>,
    /// PKI subject alternative names
    #[serde(default)]
    pub alt_names: Vec<String>,
    /// PKI IP subject alternative names
    #[serde(default)]
    pub ip_sans: Vec<String>,
    /// Requested certificate TTL as a Kubernetes duration (e.g. "24h")
    #[serde(default)]
    pub ttl: Option<String>,
    /// KV engine version (1 or 2)
    /// Default: 2
    #[serde(default = "default_kv_version")]
    pub kv_version: u8,
}

fn default_kv_version() -> u8 {
    2
}

fn params_schema(_gen: &mut SchemaGenerator) -> Schema {
    let schema_value = serde_json::json!({
        "type": "object",
        "nullable": true,
        "description": "Extra request parameters passed to Vault unchanged.",
        "x-kubernetes-preserve-unknown-fields": true
    });
    Schema::try_from(schema_value).expect("Failed to create Schema for source params")
}
