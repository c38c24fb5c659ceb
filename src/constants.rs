//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default exponential backoff base delay (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff ceiling (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Consecutive fatal failures tolerated before a resource is parked until edited
pub const DEFAULT_MAX_FATAL_RETRIES: u32 = 5;

/// Consecutive retryable failures tolerated before surfacing `Failed` (0 = unlimited)
pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 0;

/// Reload-and-retry attempts on destination write conflicts
pub const DEFAULT_WRITE_CONFLICT_RETRIES: u32 = 3;

/// Deadline applied to every backend call (seconds)
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default number of resources allowed to run a sync cycle at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default fraction of a credential's lifetime after which it is refreshed
pub const DEFAULT_RENEWAL_WINDOW_FRACTION: f64 = 0.67;

/// Reserved destination key holding the full backend response as JSON
pub const RAW_DATA_KEY: &str = "_raw";

/// Finalizer guarding destination cleanup on resource deletion
pub const FINALIZER: &str = "vault-secrets.octopilot.io/finalizer";

/// Annotation whose value change forces an immediate resync
pub const RESYNC_ANNOTATION: &str = "vault-secrets.octopilot.io/resync";

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "vault-secrets-controller";

/// Owner labels attached to destinations created by the controller
pub const OWNER_LABELS: [(&str, &str); 3] = [
    ("app.kubernetes.io/name", "vault-secrets-controller"),
    ("app.kubernetes.io/managed-by", "octopilot-vsc"),
    ("app.kubernetes.io/component", "secret-sync"),
];

/// Default Vault address
pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";

/// Default mount of the Vault Kubernetes auth method
pub const DEFAULT_VAULT_AUTH_MOUNT: &str = "kubernetes";

/// Projected service account token used for Vault Kubernetes auth
pub const DEFAULT_SA_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
