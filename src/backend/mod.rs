//! # Secret Backend
//!
//! Typed request/response interface to the external secret backend.
//!
//! - `error.rs` - Backend error taxonomy and HTTP status classification
//! - `record.rs` - Credential records built from backend responses
//! - `vault/` - Vault HTTP API implementation

pub mod error;
pub mod record;
pub mod vault;

pub use error::BackendError;
pub use record::{CredentialRecord, Lease, LeaseRenewal, ResponseShape};
pub use vault::VaultClient;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation carried by every backend call
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    /// Context expiring `timeout` from now, cancelled together with `cancel`
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` to completion unless the context is cancelled or the deadline passes
    ///
    /// Cancellation wins over completion when both are ready. A call that
    /// outlives its deadline fails `Unavailable` so it is retried with backoff.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(BackendError::Cancelled),
            result = tokio::time::timeout_at(self.deadline, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(BackendError::Unavailable(format!(
                    "{operation} exceeded its deadline"
                ))),
            },
        }
    }
}

/// Secret backend trait
///
/// Implementations hold no local cache: every call reaches the backend.
/// Shared read-only across all per-resource workers.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Read a dynamic (leased) secret at `{mount}/{path}`
    async fn fetch_dynamic(
        &self,
        ctx: &CallContext,
        mount: &str,
        path: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<CredentialRecord, BackendError>;

    /// Read a static key/value secret
    async fn read_static(
        &self,
        ctx: &CallContext,
        mount: &str,
        path: &str,
        kv_version: u8,
    ) -> Result<CredentialRecord, BackendError>;

    /// Issue a new certificate from a PKI role
    async fn issue_certificate(
        &self,
        ctx: &CallContext,
        mount: &str,
        role: &str,
        common_name: &str,
        params: &Map<String, Value>,
    ) -> Result<CredentialRecord, BackendError>;

    /// Extend a lease by `increment` (backend default when `None`)
    async fn renew_lease(
        &self,
        ctx: &CallContext,
        lease_id: &str,
        increment: Option<Duration>,
    ) -> Result<LeaseRenewal, BackendError>;

    /// Revoke a lease immediately
    async fn revoke_lease(&self, ctx: &CallContext, lease_id: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_call_past_deadline_is_unavailable() {
        let ctx = CallContext::new(Duration::from_secs(30), CancellationToken::new());
        let result: Result<(), BackendError> = ctx
            .run("fetch_dynamic", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_cancelled_call_fails_cancelled() {
        let cancel = CancellationToken::new();
        let ctx = CallContext::new(Duration::from_secs(30), cancel.clone());
        let handle = tokio::spawn(async move {
            ctx.run("renew_lease", std::future::pending::<Result<(), BackendError>>())
                .await
        });
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BackendError::Cancelled)));
    }

    #[tokio::test]
    async fn test_completed_call_passes_result_through() {
        let ctx = CallContext::new(Duration::from_secs(5), CancellationToken::new());
        let result = ctx.run("revoke_lease", async { Ok(7) }).await.unwrap();
        assert_eq!(result, 7);
    }
}
