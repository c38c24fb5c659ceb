//! # Vault Secrets Controller
//!
//! A Kubernetes controller that syncs secrets from Vault into Kubernetes Secrets.
//!
//! ## Overview
//!
//! For every `VaultSecret` resource the controller:
//!
//! 1. **Fetches** a dynamic secret, issues a PKI certificate, or reads a KV secret
//! 2. **Writes** the destination Secret, with owner labels and reference when it owns it
//! 3. **Refreshes** before expiry, renewing leases in place where Vault allows
//! 4. **Reports** phase, lease and next sync time on the status subresource and as events
//!
//! ## Usage
//!
//! Install the CRD with `cargo run --bin crdgen | kubectl apply -f -`, then run the
//! controller in-cluster. Configuration is read from the environment (`VAULT_ADDR`,
//! `VAULT_AUTH_METHOD`, `MAX_CONCURRENT_RECONCILIATIONS`, ...).

use anyhow::Result;
use tracing::{info, warn};
use vault_secrets_controller::runtime::initialization::initialize;
use vault_secrets_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.resources,
        init.scheduler,
        init.server_state,
        &init.controller_config,
    )
    .await?;

    // Workers are gone, so the reporter channel closes and the task drains
    if tokio::time::timeout(std::time::Duration::from_secs(5), init.reporter_handle)
        .await
        .is_err()
    {
        warn!("Timed out flushing status updates");
    }
    info!("Shutdown complete");
    Ok(())
}
