//! # Writer
//!
//! Writes a `CredentialRecord` to its destination Secret.
//!
//! - Data is compared by key/value content; unchanged writes are skipped
//! - The whole data map is replaced in one call carrying the observed
//!   `resourceVersion`, so readers see either all new or all previous content
//! - With `create=true` the Secret carries exactly the owner labels and one
//!   owner reference; a pre-existing Secret not owned by the resource is
//!   never adopted
//! - With `create=false` labels and owner references are never touched

use super::store::{SecretStore, StoreError};
use crate::backend::CredentialRecord;
use crate::constants::{OWNER_LABELS, RAW_DATA_KEY};
use crate::controller::reconciler::ErrorKind;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Where and how a record is written
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationTarget {
    pub namespace: String,
    pub name: String,
    /// Create and own the Secret
    pub create: bool,
    /// Reference to the originating VaultSecret
    pub owner: OwnerReference,
}

impl DestinationTarget {
    fn display(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn is_owned(&self, secret: &Secret) -> bool {
        secret
            .metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.uid == self.owner.uid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

impl WriteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Updated => "updated",
            WriteOutcome::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub outcome: WriteOutcome,
    /// Conflicts that were resolved by reloading and retrying
    pub conflicts: u32,
}

impl WriteResult {
    pub fn changed(&self) -> bool {
        self.outcome != WriteOutcome::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("destination secret {0} does not exist and destination.create is false")]
    DestinationMissing(String),
    #[error("destination secret {name} has incompatible type {secret_type}")]
    IncompatibleType { name: String, secret_type: String },
    #[error("destination secret {0} exists and is not owned by this VaultSecret")]
    NotOwned(String),
    #[error("refusing to write a credential with no data")]
    EmptyData,
    #[error("credential carries reserved key '_raw'")]
    ReservedKey,
    #[error("destination secret {name} still conflicting after {attempts} attempts")]
    Conflict { name: String, attempts: u32 },
    #[error("failed to encode backend response: {0}")]
    Encode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WriteError::DestinationMissing(_) => ErrorKind::NotFound,
            WriteError::IncompatibleType { .. }
            | WriteError::NotOwned(_)
            | WriteError::ReservedKey
            | WriteError::Encode(_) => ErrorKind::InvalidRequest,
            WriteError::EmptyData => ErrorKind::EmptyResult,
            WriteError::Conflict { .. } => ErrorKind::WriteConflict,
            WriteError::Store(_) => ErrorKind::Unavailable,
        }
    }
}

/// Flat destination data: every record entry plus `_raw`
///
/// # Errors
/// Fails when the record itself carries `_raw` or the raw response cannot be encoded
pub fn build_data(record: &CredentialRecord) -> Result<BTreeMap<String, ByteString>, WriteError> {
    if record.data.contains_key(RAW_DATA_KEY) {
        return Err(WriteError::ReservedKey);
    }
    let mut data: BTreeMap<String, ByteString> = record
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone())))
        .collect();
    let raw = serde_json::to_vec(&record.raw).map_err(|e| WriteError::Encode(e.to_string()))?;
    data.insert(RAW_DATA_KEY.to_string(), ByteString(raw));
    Ok(data)
}

fn owner_labels() -> BTreeMap<String, String> {
    OWNER_LABELS
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Destination Secret writer
#[derive(Clone)]
pub struct DestinationWriter {
    store: Arc<dyn SecretStore>,
    max_conflict_retries: u32,
}

impl std::fmt::Debug for DestinationWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationWriter")
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl DestinationWriter {
    pub fn new(store: Arc<dyn SecretStore>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    /// Create or update the destination with `record`
    ///
    /// # Errors
    /// See [`WriteError`]; conflicts are retried up to the configured limit first
    pub async fn write(
        &self,
        target: &DestinationTarget,
        record: &CredentialRecord,
    ) -> Result<WriteResult, WriteError> {
        if record.is_empty() {
            return Err(WriteError::EmptyData);
        }
        let data = build_data(record)?;

        let mut conflicts = 0;
        loop {
            match self.try_write(target, &data).await {
                Ok(outcome) => {
                    metrics::increment_writes(outcome.as_str());
                    return Ok(WriteResult { outcome, conflicts });
                }
                Err(WriteError::Store(StoreError::Conflict(message))) => {
                    conflicts += 1;
                    metrics::increment_writes("conflict");
                    if conflicts > self.max_conflict_retries {
                        return Err(WriteError::Conflict {
                            name: target.display(),
                            attempts: conflicts,
                        });
                    }
                    debug!(
                        destination = %target.display(),
                        attempt = conflicts,
                        reason = %message,
                        "Write conflict, reloading destination"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_write(
        &self,
        target: &DestinationTarget,
        data: &BTreeMap<String, ByteString>,
    ) -> Result<WriteOutcome, WriteError> {
        let existing = self.store.get(&target.namespace, &target.name).await?;

        let Some(existing) = existing else {
            if !target.create {
                return Err(WriteError::DestinationMissing(target.display()));
            }
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(target.name.clone()),
                    namespace: Some(target.namespace.clone()),
                    labels: Some(owner_labels()),
                    owner_references: Some(vec![target.owner.clone()]),
                    ..ObjectMeta::default()
                },
                type_: Some("Opaque".to_string()),
                data: Some(data.clone()),
                ..Secret::default()
            };
            self.store.create(&target.namespace, &secret).await?;
            info!(destination = %target.display(), "Created destination secret");
            return Ok(WriteOutcome::Created);
        };

        if let Some(secret_type) = existing.type_.as_deref() {
            if secret_type != "Opaque" {
                return Err(WriteError::IncompatibleType {
                    name: target.display(),
                    secret_type: secret_type.to_string(),
                });
            }
        }

        let mut desired = existing.clone();
        desired.data = Some(data.clone());
        desired.string_data = None;

        if target.create {
            if !target.is_owned(&existing) {
                return Err(WriteError::NotOwned(target.display()));
            }
            desired.metadata.labels = Some(owner_labels());
        }

        let unchanged = existing.data.clone().unwrap_or_default() == *data
            && existing.metadata.labels == desired.metadata.labels;
        if unchanged {
            return Ok(WriteOutcome::Unchanged);
        }

        self.store
            .replace(&target.namespace, &target.name, &desired)
            .await?;
        info!(destination = %target.display(), "Updated destination secret");
        Ok(WriteOutcome::Updated)
    }

    /// Delete the destination when this resource created it
    ///
    /// Returns whether a Secret was deleted. A destination that is not owned
    /// (or `create=false`) is always left in place.
    ///
    /// # Errors
    /// Returns an error if the Secret API call fails
    pub async fn delete_if_owned(&self, target: &DestinationTarget) -> Result<bool, WriteError> {
        if !target.create {
            return Ok(false);
        }
        let Some(existing) = self.store.get(&target.namespace, &target.name).await? else {
            return Ok(false);
        };
        if !target.is_owned(&existing) {
            debug!(
                destination = %target.display(),
                "Destination not owned by this resource, leaving it in place"
            );
            return Ok(false);
        }
        let deleted = self
            .store
            .delete(
                &target.namespace,
                &target.name,
                existing.metadata.uid.as_deref(),
            )
            .await?;
        if deleted {
            info!(destination = %target.display(), "Deleted destination secret");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResponseShape;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_build_data_adds_raw() {
        let body = json!({"lease_id": "l1", "data": {"username": "u1", "password": "p1"}});
        let record =
            CredentialRecord::from_response(body.clone(), ResponseShape::Dynamic, Utc::now())
                .unwrap();
        let data = build_data(&record).unwrap();
        assert_eq!(data.len(), record.data.len() + 1);
        assert_eq!(data["username"], ByteString(b"u1".to_vec()));
        let raw: serde_json::Value = serde_json::from_slice(&data[RAW_DATA_KEY].0).unwrap();
        assert_eq!(raw, body);
    }

    #[test]
    fn test_build_data_rejects_reserved_key() {
        let mut record = CredentialRecord::from_response(
            json!({"data": {"k": "v"}}),
            ResponseShape::KvV1,
            Utc::now(),
        )
        .unwrap();
        record.data.insert(RAW_DATA_KEY.to_string(), b"x".to_vec());
        assert_eq!(build_data(&record), Err(WriteError::ReservedKey));
    }

    #[test]
    fn test_write_error_kinds() {
        assert_eq!(
            WriteError::DestinationMissing("a/b".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WriteError::NotOwned("a/b".to_string()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(WriteError::EmptyData.kind(), ErrorKind::EmptyResult);
        assert_eq!(
            WriteError::Conflict {
                name: "a/b".to_string(),
                attempts: 4
            }
            .kind(),
            ErrorKind::WriteConflict
        );
    }
}
