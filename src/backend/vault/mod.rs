//! # Vault Client
//!
//! Native REST implementation of `SecretBackend` for the Vault HTTP API.
//! Uses reqwest for HTTP requests.
//!
//! | operation          | request                                      |
//! |--------------------|----------------------------------------------|
//! | fetch_dynamic      | `GET /v1/{mount}/{path}` (`POST` with params) |
//! | read_static (kv1)  | `GET /v1/{mount}/{path}`                     |
//! | read_static (kv2)  | `GET /v1/{mount}/data/{path}`                |
//! | issue_certificate  | `POST /v1/{mount}/issue/{role}`              |
//! | renew_lease        | `PUT /v1/sys/leases/renew`                   |
//! | revoke_lease       | `PUT /v1/sys/leases/revoke`                  |

mod auth;

pub use auth::VaultAuth;

use crate::backend::{
    BackendError, CallContext, CredentialRecord, LeaseRenewal, ResponseShape, SecretBackend,
};
use crate::config::VaultConfig;
use crate::controller::clock::Clock;
use crate::observability::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Vault HTTP API client
pub struct VaultClient {
    http: Client,
    address: String,
    namespace: Option<String>,
    auth: VaultAuth,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Create a new Vault client
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: &VaultConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(config.skip_verify)
            .build()
            .context("Failed to create HTTP client")?;

        if config.skip_verify {
            warn!("VAULT_SKIP_VERIFY is set: TLS certificates are not verified");
        }

        let auth = VaultAuth::new(
            config.auth.clone(),
            http.clone(),
            config.address.clone(),
            config.namespace.clone(),
            Arc::clone(&clock),
        );

        Ok(Self {
            http,
            address: config.address.clone(),
            namespace: config.namespace.clone(),
            auth,
            clock,
        })
    }

    /// Send one API request and return the JSON body
    ///
    /// A 403 triggers a single re-login and retry when the auth method can
    /// produce a new token.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, BackendError> {
        let start = Instant::now();
        let result = self.send_inner(method, path, body).await;
        metrics::record_backend_request(operation, start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(operation, error = %e, "Vault request failed");
        }
        result
    }

    async fn send_inner(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        let mut reauthenticated = false;
        loop {
            let token = self.auth.token().await?;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("X-Vault-Token", token.as_str());
            if let Some(namespace) = &self.namespace {
                request = request.header("X-Vault-Namespace", namespace);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| BackendError::from_transport(&e))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| BackendError::from_transport(&e))?;

            if status.is_success() {
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text).map_err(|e| {
                    BackendError::InvalidRequest(format!("malformed response: {e}"))
                });
            }

            if status.as_u16() == 403 && !reauthenticated && self.auth.can_reauthenticate() {
                debug!("Vault rejected token, logging in again");
                self.auth.invalidate().await;
                reauthenticated = true;
                continue;
            }
            return Err(BackendError::from_status(status.as_u16(), &text));
        }
    }
}

fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl SecretBackend for VaultClient {
    async fn fetch_dynamic(
        &self,
        ctx: &CallContext,
        mount: &str,
        path: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<CredentialRecord, BackendError> {
        let api_path = join_path(&[mount, path]);
        let body = ctx
            .run("fetch_dynamic", async {
                match params.filter(|p| !p.is_empty()) {
                    Some(params) => {
                        let payload = Value::Object(params.clone());
                        self.send("fetch_dynamic", Method::POST, &api_path, Some(&payload))
                            .await
                    }
                    None => {
                        self.send("fetch_dynamic", Method::GET, &api_path, None)
                            .await
                    }
                }
            })
            .await?;
        CredentialRecord::from_response(body, ResponseShape::Dynamic, self.clock.now())
    }

    async fn read_static(
        &self,
        ctx: &CallContext,
        mount: &str,
        path: &str,
        kv_version: u8,
    ) -> Result<CredentialRecord, BackendError> {
        let (api_path, shape) = if kv_version == 1 {
            (join_path(&[mount, path]), ResponseShape::KvV1)
        } else {
            (join_path(&[mount, "data", path]), ResponseShape::KvV2)
        };
        let body = ctx
            .run(
                "read_static",
                self.send("read_static", Method::GET, &api_path, None),
            )
            .await?;
        CredentialRecord::from_response(body, shape, self.clock.now())
    }

    async fn issue_certificate(
        &self,
        ctx: &CallContext,
        mount: &str,
        role: &str,
        common_name: &str,
        params: &Map<String, Value>,
    ) -> Result<CredentialRecord, BackendError> {
        let api_path = join_path(&[mount, "issue", role]);
        let mut payload = params.clone();
        payload.insert(
            "common_name".to_string(),
            Value::String(common_name.to_string()),
        );
        let payload = Value::Object(payload);
        let body = ctx
            .run(
                "issue_certificate",
                self.send("issue_certificate", Method::POST, &api_path, Some(&payload)),
            )
            .await?;
        CredentialRecord::from_response(body, ResponseShape::Certificate, self.clock.now())
    }

    async fn renew_lease(
        &self,
        ctx: &CallContext,
        lease_id: &str,
        increment: Option<Duration>,
    ) -> Result<LeaseRenewal, BackendError> {
        let mut payload = serde_json::json!({ "lease_id": lease_id });
        if let Some(increment) = increment {
            payload["increment"] = Value::from(increment.as_secs());
        }
        let body = ctx
            .run(
                "renew_lease",
                self.send("renew_lease", Method::PUT, "sys/leases/renew", Some(&payload)),
            )
            .await?;
        LeaseRenewal::from_response(&body)
    }

    async fn revoke_lease(&self, ctx: &CallContext, lease_id: &str) -> Result<(), BackendError> {
        let payload = serde_json::json!({ "lease_id": lease_id });
        ctx.run(
            "revoke_lease",
            self.send("revoke_lease", Method::PUT, "sys/leases/revoke", Some(&payload)),
        )
        .await?;
        Ok(())
    }
}
