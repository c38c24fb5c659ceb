//! # Vault Authentication
//!
//! Supplies the client token for every request.
//!
//! - `token`: static token from the environment or a token file
//! - `kubernetes`: login with the pod's service account JWT; the returned
//!   client token is cached and re-acquired when 90% of its lease has elapsed
//!   or after the backend rejected it

use crate::backend::BackendError;
use crate::backend::record::checked_after;
use crate::config::VaultAuthConfig;
use crate::controller::clock::Clock;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Share of the token lease after which a new login is performed
const TOKEN_REFRESH_FRACTION: f64 = 0.9;

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: Zeroizing<String>,
    #[serde(default)]
    lease_duration: u64,
}

struct CachedToken {
    token: Zeroizing<String>,
    refresh_at: Option<DateTime<Utc>>,
}

/// Token provider for the Vault client
pub struct VaultAuth {
    config: VaultAuthConfig,
    http: reqwest::Client,
    address: String,
    namespace: Option<String>,
    clock: Arc<dyn Clock>,
    cached: AsyncMutex<Option<CachedToken>>,
}

impl std::fmt::Debug for VaultAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultAuth")
            .field("config", &self.config)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl VaultAuth {
    pub fn new(
        config: VaultAuthConfig,
        http: reqwest::Client,
        address: String,
        namespace: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            http,
            address,
            namespace,
            clock,
            cached: AsyncMutex::new(None),
        }
    }

    /// Current client token, logging in first when none is cached or it is due
    pub async fn token(&self) -> Result<Zeroizing<String>, BackendError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();
        if let Some(current) = cached.as_ref() {
            if current.refresh_at.is_none_or(|at| now < at) {
                return Ok(current.token.clone());
            }
            debug!("Vault token due for refresh");
        }
        let fresh = self.login(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token so the next call logs in again
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Whether a rejected token can be replaced by logging in again
    pub fn can_reauthenticate(&self) -> bool {
        match &self.config {
            VaultAuthConfig::Token { token_path, .. } => token_path.is_some(),
            VaultAuthConfig::Kubernetes { .. } => true,
        }
    }

    async fn login(&self, now: DateTime<Utc>) -> Result<CachedToken, BackendError> {
        match &self.config {
            VaultAuthConfig::Token { token, token_path } => {
                let token = match (token_path, token) {
                    (Some(path), _) => Zeroizing::new(
                        tokio::fs::read_to_string(path)
                            .await
                            .map_err(|e| {
                                BackendError::Unauthenticated(format!(
                                    "cannot read token file {}: {e}",
                                    path.display()
                                ))
                            })?
                            .trim()
                            .to_string(),
                    ),
                    (None, Some(token)) => token.clone(),
                    (None, None) => {
                        return Err(BackendError::Unauthenticated(
                            "no Vault token configured".to_string(),
                        ));
                    }
                };
                Ok(CachedToken {
                    token,
                    refresh_at: None,
                })
            }
            VaultAuthConfig::Kubernetes {
                mount,
                role,
                jwt_path,
            } => {
                let jwt = Zeroizing::new(
                    tokio::fs::read_to_string(jwt_path)
                        .await
                        .map_err(|e| {
                            BackendError::Unauthenticated(format!(
                                "cannot read service account token {}: {e}",
                                jwt_path.display()
                            ))
                        })?
                        .trim()
                        .to_string(),
                );
                let url = format!(
                    "{}/v1/auth/{}/login",
                    self.address,
                    mount.trim_matches('/')
                );
                let mut request = self.http.post(&url).json(&serde_json::json!({
                    "role": role,
                    "jwt": jwt.as_str(),
                }));
                if let Some(namespace) = &self.namespace {
                    request = request.header("X-Vault-Namespace", namespace);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| BackendError::from_transport(&e))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(BackendError::from_status(status.as_u16(), &body));
                }
                let login: LoginResponse = response.json().await.map_err(|e| {
                    BackendError::InvalidRequest(format!("malformed login response: {e}"))
                })?;

                info!(
                    auth.mount = %mount,
                    auth.role = %role,
                    lease_duration = login.auth.lease_duration,
                    "Authenticated to Vault with Kubernetes auth"
                );

                let refresh_at = (login.auth.lease_duration > 0)
                    .then(|| {
                        let secs =
                            (login.auth.lease_duration as f64 * TOKEN_REFRESH_FRACTION) as u64;
                        checked_after(now, std::time::Duration::from_secs(secs))
                    })
                    .flatten();
                Ok(CachedToken {
                    token: login.auth.client_token,
                    refresh_at,
                })
            }
        }
    }
}
