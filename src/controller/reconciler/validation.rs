//! # Validation
//!
//! Checks a VaultSecret before any backend call is made and resolves it into
//! a typed request. Every failure here is fatal: only an edit fixes it.

use super::types::SpecSnapshot;
use crate::controller::lease::LeaseTracker;
use crate::crd::SourceType;
use regex::Regex;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecValidationError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),
    #[error("refresh.renewalWindowFraction must be in (0, 1], got {0}")]
    InvalidFraction(String),
    #[error("invalid duration '{value}' in {field}: {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("source.kvVersion must be 1 or 2, got {0}")]
    InvalidKvVersion(u8),
    #[error(
        "destination.create requires the destination namespace '{destination}' to equal the resource namespace '{resource}'"
    )]
    CrossNamespaceOwnership {
        destination: String,
        resource: String,
    },
}

/// Backend request resolved from `spec.source`
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRequest {
    Dynamic {
        mount: String,
        path: String,
        params: Option<Map<String, Value>>,
    },
    Pki {
        mount: String,
        role: String,
        common_name: String,
        params: Map<String, Value>,
    },
    Kv {
        mount: String,
        path: String,
        kv_version: u8,
    },
}

impl SourceRequest {
    pub fn kind(&self) -> SourceType {
        match self {
            SourceRequest::Dynamic { .. } => SourceType::Dynamic,
            SourceRequest::Pki { .. } => SourceType::Pki,
            SourceRequest::Kv { .. } => SourceType::Kv,
        }
    }
}

/// A VaultSecret that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSpec {
    pub source: SourceRequest,
    pub destination_namespace: String,
    pub tracker: LeaseTracker,
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, SpecValidationError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(SpecValidationError::MissingField(field))
}

fn optional_duration(
    value: Option<&str>,
    field: &'static str,
) -> Result<Option<Duration>, SpecValidationError> {
    value
        .map(|v| {
            parse_kubernetes_duration(v).map_err(|reason| SpecValidationError::InvalidDuration {
                field,
                value: v.to_string(),
                reason,
            })
        })
        .transpose()
}

/// Validate a snapshot and resolve its source request
///
/// # Errors
/// Returns the first problem found
pub fn validate(snapshot: &SpecSnapshot) -> Result<ValidatedSpec, SpecValidationError> {
    let spec = &snapshot.spec;
    let source = &spec.source;
    let mount = required(Some(&source.mount), "source.mount")?;

    let request = match source.r#type {
        SourceType::Dynamic => SourceRequest::Dynamic {
            mount,
            path: required(source.path.as_deref(), "source.path")?,
            params: source.params.clone().filter(|p| !p.is_empty()),
        },
        SourceType::Kv => {
            if !matches!(source.kv_version, 1 | 2) {
                return Err(SpecValidationError::InvalidKvVersion(source.kv_version));
            }
            SourceRequest::Kv {
                mount,
                path: required(source.path.as_deref(), "source.path")?,
                kv_version: source.kv_version,
            }
        }
        SourceType::Pki => {
            let role = required(source.role.as_deref(), "source.role")?;
            let common_name = required(source.common_name.as_deref(), "source.commonName")?;
            optional_duration(source.ttl.as_deref(), "source.ttl")?;

            let mut params = source.params.clone().unwrap_or_default();
            if !source.alt_names.is_empty() {
                params.insert(
                    "alt_names".to_string(),
                    Value::String(source.alt_names.join(",")),
                );
            }
            if !source.ip_sans.is_empty() {
                params.insert(
                    "ip_sans".to_string(),
                    Value::String(source.ip_sans.join(",")),
                );
            }
            if let Some(ttl) = source.ttl.as_deref() {
                params.insert("ttl".to_string(), Value::String(ttl.trim().to_string()));
            }
            SourceRequest::Pki {
                mount,
                role,
                common_name,
                params,
            }
        }
    };

    required(Some(&spec.destination.name), "destination.name")?;
    let destination_namespace = spec
        .destination
        .namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .unwrap_or(&snapshot.key.namespace)
        .to_string();
    if spec.destination.create && destination_namespace != snapshot.key.namespace {
        return Err(SpecValidationError::CrossNamespaceOwnership {
            destination: destination_namespace,
            resource: snapshot.key.namespace.clone(),
        });
    }

    let fraction = spec.refresh.renewal_window_fraction;
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(SpecValidationError::InvalidFraction(fraction.to_string()));
    }
    let refresh_after =
        optional_duration(spec.refresh.refresh_after.as_deref(), "refresh.refreshAfter")?;
    let max_lease_ttl =
        optional_duration(spec.refresh.max_lease_ttl.as_deref(), "refresh.maxLeaseTtl")?;

    Ok(ValidatedSpec {
        source: request,
        destination_namespace,
        tracker: LeaseTracker::new(fraction, refresh_after, max_lease_ttl),
    })
}

/// Parse a Kubernetes-style duration string into a Duration
///
/// Accepts one or more `<number><unit>` pairs with units s, m, h, d
/// (e.g. "30s", "5m", "1h", "1h30m"). The total must be greater than zero.
///
/// # Errors
/// Returns a description of the problem
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, String> {
    let duration_trimmed = duration_str.trim().to_lowercase();
    if duration_trimmed.is_empty() {
        return Err("duration string cannot be empty".to_string());
    }

    let whole = Regex::new(r"^(\d+[smhd])+$").map_err(|e| format!("failed to compile regex: {e}"))?;
    if !whole.is_match(&duration_trimmed) {
        return Err(
            "expected one or more <number><unit> pairs (e.g. '30s', '5m', '1h30m')".to_string(),
        );
    }

    let part = Regex::new(r"(?P<number>\d+)(?P<unit>[smhd])")
        .map_err(|e| format!("failed to compile regex: {e}"))?;
    let mut total_secs: u64 = 0;
    for captures in part.captures_iter(&duration_trimmed) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|e| format!("invalid number '{}': {e}", &captures["number"]))?;
        let multiplier = match &captures["unit"] {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            _ => 86_400,
        };
        total_secs = number
            .checked_mul(multiplier)
            .and_then(|secs| total_secs.checked_add(secs))
            .ok_or_else(|| "duration is too large".to_string())?;
    }

    if total_secs == 0 {
        return Err("duration must be greater than 0".to_string());
    }
    Ok(Duration::from_secs(total_secs))
}
