//! # Credential Records
//!
//! A `CredentialRecord` is the result of one successful fetch. Records are
//! values: a lease renewal produces a new record rather than mutating the
//! current one.

use super::BackendError;
use crate::constants::RAW_DATA_KEY;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Layout of the backend response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Dynamic secret: flat `data`, lease fields at the top level
    Dynamic,
    /// PKI issue: flat `data` with `serial_number` and `expiration`
    Certificate,
    /// KV version 1: flat `data`
    KvV1,
    /// KV version 2: payload nested under `data.data`
    KvV2,
}

/// Active lease on a dynamic credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    pub duration: Duration,
    pub renewable: bool,
    /// When the credential behind this lease was first issued
    /// Renewals keep this value, so it bounds the total renewal budget
    pub first_issued_at: DateTime<Utc>,
}

/// Result of a lease renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRenewal {
    pub lease_id: String,
    pub lease_duration: Duration,
    pub renewable: bool,
}

impl LeaseRenewal {
    /// Parse a `sys/leases/renew` response
    pub fn from_response(body: &Value) -> Result<Self, BackendError> {
        let lease_id = body
            .get("lease_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BackendError::InvalidRequest("renewal response has no lease_id".to_string())
            })?;
        Ok(Self {
            lease_id: lease_id.to_string(),
            lease_duration: Duration::from_secs(
                body.get("lease_duration").and_then(Value::as_u64).unwrap_or(0),
            ),
            renewable: body
                .get("renewable")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Secret material from one successful fetch
#[derive(Clone, PartialEq)]
pub struct CredentialRecord {
    /// Flat key to bytes mapping written to the destination
    pub data: BTreeMap<String, Vec<u8>>,
    pub lease: Option<Lease>,
    /// Start of the current validity window (fetch or last renewal)
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub serial_number: Option<String>,
    /// Backend response stored under `_raw`, see [`raw_response`]
    pub raw: Value,
}

// Secret values never reach the logs
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("lease", &self.lease)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("serial_number", &self.serial_number)
            .finish_non_exhaustive()
    }
}

impl CredentialRecord {
    /// Build a record from a backend response body
    ///
    /// String values are stored as their UTF-8 bytes; every other value is
    /// JSON-encoded. A `null` payload yields an empty record, which the
    /// reconciler reports as an empty result.
    pub fn from_response(
        body: Value,
        shape: ResponseShape,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, BackendError> {
        let payload = match shape {
            ResponseShape::KvV2 => body.get("data").and_then(|d| d.get("data")),
            _ => body.get("data"),
        };
        let empty = Map::new();
        let payload = match payload {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(BackendError::InvalidRequest(
                    "response data is not an object".to_string(),
                ));
            }
        };

        if payload.contains_key(RAW_DATA_KEY) {
            return Err(BackendError::InvalidRequest(format!(
                "response data carries reserved key '{RAW_DATA_KEY}'"
            )));
        }

        let mut data = BTreeMap::new();
        for (key, value) in payload {
            let bytes = match value {
                Value::String(s) => s.as_bytes().to_vec(),
                other => serde_json::to_vec(other).map_err(|e| {
                    BackendError::InvalidRequest(format!("cannot encode value of '{key}': {e}"))
                })?,
            };
            data.insert(key.clone(), bytes);
        }

        let lease = body
            .get("lease_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(|id| Lease {
                id: id.to_string(),
                duration: Duration::from_secs(
                    body.get("lease_duration").and_then(Value::as_u64).unwrap_or(0),
                ),
                renewable: body
                    .get("renewable")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                first_issued_at: fetched_at,
            });

        let serial_number = payload
            .get("serial_number")
            .and_then(Value::as_str)
            .map(str::to_string);

        let certificate_expiry = payload
            .get("expiration")
            .and_then(Value::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let expires_at = match (shape, certificate_expiry, &lease) {
            (ResponseShape::Certificate, Some(expiry), _) => Some(expiry),
            (_, _, Some(lease)) if !lease.duration.is_zero() => {
                checked_after(fetched_at, lease.duration)
            }
            _ => None,
        };
        let raw = raw_response(&body, shape);

        Ok(Self {
            data,
            lease,
            issued_at: fetched_at,
            expires_at,
            serial_number,
            raw,
        })
    }

    /// New record reflecting a successful lease renewal at `now`
    #[must_use]
    pub fn renewed(&self, renewal: &LeaseRenewal, now: DateTime<Utc>) -> Self {
        let first_issued_at = self
            .lease
            .as_ref()
            .map_or(self.issued_at, |lease| lease.first_issued_at);
        Self {
            data: self.data.clone(),
            lease: Some(Lease {
                id: renewal.lease_id.clone(),
                duration: renewal.lease_duration,
                renewable: renewal.renewable,
                first_issued_at,
            }),
            issued_at: now,
            expires_at: (!renewal.lease_duration.is_zero())
                .then(|| checked_after(now, renewal.lease_duration))
                .flatten(),
            serial_number: self.serial_number.clone(),
            raw: self.raw.clone(),
        }
    }

    pub fn lease_id(&self) -> Option<&str> {
        self.lease.as_ref().map(|lease| lease.id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// `at + duration`, or `None` when the sum leaves the representable range
pub(crate) fn checked_after(at: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
}

/// Fields Vault sets per request; they change on every read
const PER_REQUEST_FIELDS: [&str; 4] = ["request_id", "wrap_info", "warnings", "auth"];

/// Response value kept under `_raw`
///
/// KV v2 keeps the `{data, metadata}` object so a single `data` lookup yields
/// the payload, as for every other engine. Per-request fields are dropped so
/// that re-reading unchanged content produces an identical value.
pub fn raw_response(body: &Value, shape: ResponseShape) -> Value {
    let mut raw = match shape {
        ResponseShape::KvV2 => body.get("data").cloned().unwrap_or(Value::Null),
        _ => body.clone(),
    };
    if let Value::Object(map) = &mut raw {
        for field in PER_REQUEST_FIELDS {
            map.remove(field);
        }
    }
    raw
}
