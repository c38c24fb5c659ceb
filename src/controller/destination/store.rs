//! # Secret Store
//!
//! Narrow view of the Kubernetes Secret API used by the writer, so the
//! writer runs unchanged against an in-memory store in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, PostParams, Preconditions};
use kube::{Api, Client};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic concurrency failure: the object changed (or vanished) since it was read
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("kubernetes API error: {0}")]
    Api(String),
}

/// Kubernetes Secret operations needed by the writer
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Create a new Secret; an existing object is a conflict
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace a Secret carrying the `resourceVersion` it was read at
    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError>;

    /// Delete a Secret if it still has `uid`; returns false when it was already gone
    async fn delete(&self, namespace: &str, name: &str, uid: Option<&str>)
        -> Result<bool, StoreError>;
}

/// `SecretStore` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn classify(error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 409 || api_err.code == 404 => {
            StoreError::Conflict(api_err.message)
        }
        other => StoreError::Api(other.to_string()),
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::Api(e.to_string()))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(classify)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError> {
        self.api(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map_err(classify)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
    ) -> Result<bool, StoreError> {
        let params = DeleteParams {
            preconditions: uid.map(|uid| Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };
        match self.api(namespace).delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(classify(e)),
        }
    }
}
