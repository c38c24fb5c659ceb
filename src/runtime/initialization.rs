//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Vault client and Kubernetes client setup.

use crate::backend::{SecretBackend, VaultClient};
use crate::config::{ControllerConfig, LogFormat, ServerConfig, VaultConfig};
use crate::controller::clock::{Clock, SystemClock};
use crate::controller::destination::{DestinationWriter, KubeSecretStore};
use crate::controller::reconciler::{EngineSettings, SyncEngine};
use crate::controller::scheduler::SyncScheduler;
use crate::controller::server::{start_server, ServerState};
use crate::controller::status::KubeStatusReporter;
use crate::crd::VaultSecret;
use crate::observability;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for VaultSecret resources in all namespaces
    pub resources: Api<VaultSecret>,
    /// Per-resource workers
    pub scheduler: Arc<SyncScheduler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Controller configuration
    pub controller_config: ControllerConfig,
    /// Background task publishing status and events
    pub reporter_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self.server_state.is_ready.load(Ordering::Relaxed),
            )
            .field("controller_config", &self.controller_config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes and Vault client creation
/// - Sync engine and scheduler setup
///
/// # Errors
/// Returns an error if metrics registration, the HTTP server, or either client fails
pub async fn initialize() -> Result<InitializationResult> {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    // An error only means a provider is already installed
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    let controller_config = ControllerConfig::from_env();
    init_tracing(controller_config.log_format);

    info!("Starting Vault Secrets Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(config = ?controller_config, "Loaded controller configuration");

    observability::metrics::register_metrics()?;

    let server_config = ServerConfig::from_env();
    let server_state = Arc::new(ServerState::default());

    // Start HTTP server in a background task and wait for it to bind
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let vault_config = VaultConfig::from_env().context("Invalid Vault configuration")?;
    info!(
        vault.address = vault_config.address.as_str(),
        vault.namespace = vault_config.namespace.as_deref().unwrap_or("none"),
        "Configured Vault backend"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend: Arc<dyn SecretBackend> = Arc::new(
        VaultClient::new(&vault_config, Arc::clone(&clock))
            .context("Failed to create Vault client")?,
    );
    let writer = DestinationWriter::new(
        Arc::new(KubeSecretStore::new(client.clone())),
        controller_config.write_conflict_retries,
    );
    let (reporter, reporter_handle) = KubeStatusReporter::spawn(client.clone());
    let engine = Arc::new(SyncEngine::new(
        backend,
        writer,
        Arc::new(reporter),
        clock,
        EngineSettings::from_config(&controller_config),
    ));
    let scheduler = Arc::new(SyncScheduler::new(
        engine,
        controller_config.max_concurrent_reconciliations,
    ));

    // Watch all namespaces
    let resources: Api<VaultSecret> = Api::all(client.clone());
    check_crd_queryable(&resources).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        resources,
        scheduler,
        server_state,
        controller_config,
        reporter_handle,
    })
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vault_secrets_controller=info".into());
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = std::time::Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(server_config.poll_interval_ms);
    let start_time = std::time::Instant::now();

    loop {
        // Check if server task crashed
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        // Check if server is ready (set by start_server once bound)
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Log whether the CRD is installed; the watch retries either way
async fn check_crd_queryable(resources: &Api<VaultSecret>) {
    match resources.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("VaultSecret CRD is queryable"),
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - watch will retry");
        }
    }
}
