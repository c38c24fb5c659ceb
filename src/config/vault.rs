//! # Vault Configuration
//!
//! Address, namespace and authentication settings for the Vault backend.

use super::{env_var_opt, env_var_or_default_bool, env_var_or_default_str};
use std::path::PathBuf;
use zeroize::Zeroizing;

/// How the controller authenticates against Vault
#[derive(Clone)]
pub enum VaultAuthConfig {
    /// Static token, either inline or read from a file on every login
    Token {
        token: Option<Zeroizing<String>>,
        token_path: Option<PathBuf>,
    },
    /// Kubernetes auth method using the pod's service account JWT
    Kubernetes {
        mount: String,
        role: String,
        jwt_path: PathBuf,
    },
}

impl std::fmt::Debug for VaultAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultAuthConfig::Token { token, token_path } => f
                .debug_struct("Token")
                .field("token", &token.as_ref().map(|_| "<redacted>"))
                .field("token_path", token_path)
                .finish(),
            VaultAuthConfig::Kubernetes {
                mount,
                role,
                jwt_path,
            } => f
                .debug_struct("Kubernetes")
                .field("mount", mount)
                .field("role", role)
                .field("jwt_path", jwt_path)
                .finish(),
        }
    }
}

/// Vault backend configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Base address, e.g. `https://vault.vault.svc:8200`
    pub address: String,
    /// Enterprise namespace sent as `X-Vault-Namespace`
    pub namespace: Option<String>,
    /// Authentication method
    pub auth: VaultAuthConfig,
    /// Accept invalid TLS certificates (development only)
    pub skip_verify: bool,
}

impl VaultConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    ///
    /// Returns an error when `VAULT_AUTH_METHOD` is unknown, when the
    /// kubernetes method has no `VAULT_AUTH_ROLE`, or when the token method
    /// has neither `VAULT_TOKEN` nor `VAULT_TOKEN_PATH`.
    pub fn from_env() -> anyhow::Result<Self> {
        use crate::constants::{DEFAULT_SA_TOKEN_PATH, DEFAULT_VAULT_ADDR, DEFAULT_VAULT_AUTH_MOUNT};

        let method = env_var_or_default_str("VAULT_AUTH_METHOD", "token");
        let auth = match method.trim().to_lowercase().as_str() {
            "token" => {
                let token = env_var_opt("VAULT_TOKEN").map(Zeroizing::new);
                let token_path = env_var_opt("VAULT_TOKEN_PATH").map(PathBuf::from);
                if token.is_none() && token_path.is_none() {
                    anyhow::bail!(
                        "VAULT_AUTH_METHOD=token requires VAULT_TOKEN or VAULT_TOKEN_PATH"
                    );
                }
                VaultAuthConfig::Token { token, token_path }
            }
            "kubernetes" | "k8s" => {
                let role = env_var_opt("VAULT_AUTH_ROLE").ok_or_else(|| {
                    anyhow::anyhow!("VAULT_AUTH_METHOD=kubernetes requires VAULT_AUTH_ROLE")
                })?;
                VaultAuthConfig::Kubernetes {
                    mount: env_var_or_default_str("VAULT_AUTH_MOUNT", DEFAULT_VAULT_AUTH_MOUNT),
                    role,
                    jwt_path: PathBuf::from(env_var_or_default_str(
                        "VAULT_SA_TOKEN_PATH",
                        DEFAULT_SA_TOKEN_PATH,
                    )),
                }
            }
            other => anyhow::bail!("unsupported VAULT_AUTH_METHOD '{other}'"),
        };

        Ok(Self {
            address: normalize_address(&env_var_or_default_str("VAULT_ADDR", DEFAULT_VAULT_ADDR)),
            namespace: env_var_opt("VAULT_NAMESPACE"),
            auth,
            skip_verify: env_var_or_default_bool("VAULT_SKIP_VERIFY", false),
        })
    }

    /// Configuration with a static token, used by tests and local runs
    #[must_use]
    pub fn with_token(address: &str, token: &str) -> Self {
        Self {
            address: normalize_address(address),
            namespace: None,
            auth: VaultAuthConfig::Token {
                token: Some(Zeroizing::new(token.to_string())),
                token_path: None,
            },
            skip_verify: false,
        }
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}
