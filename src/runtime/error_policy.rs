//! # Error Policy
//!
//! Classification and backoff for `VaultSecret` watch stream errors.
//!
//! Sync errors never reach this layer: the sync engine turns them into
//! per-resource state transitions.

use crate::controller::backoff::ExponentialBackoff;
use std::time::Duration;
use tracing::{error, warn};

/// What the watch loop does after a stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorAction {
    /// Keep consuming the current stream
    Continue,
    /// Drop the stream and start a new watch
    Restart,
}

/// Watch error classes the loop reacts to differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch error from its rendered message
///
/// 404 is checked before 401 because a plain-text 404 body surfaces as a
/// deserialization error mentioning the failed watch.
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorClass::NotFound;
    }
    if error_string.contains("401")
        || error_string.contains("403")
        || error_string.contains("Unauthorized")
        || error_string.contains("Forbidden")
    {
        return WatchErrorClass::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorClass::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorClass::Throttled;
    }
    WatchErrorClass::Other
}

/// Handle a watch stream error, sleeping where the class calls for it
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &mut ExponentialBackoff,
    watch_restart_delay: Duration,
) -> WatchErrorAction {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorClass::Unauthorized => {
            error!(
                "Watch authentication failed - RBAC may have been revoked or the token expired"
            );
            error!("Verify the controller can list VaultSecrets:");
            error!(
                "   kubectl auth can-i list vaultsecrets.vault-secrets.octopilot.io --as=system:serviceaccount:octopilot-system:vault-secrets-controller --all-namespaces"
            );
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            WatchErrorAction::Restart
        }
        WatchErrorClass::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            WatchErrorAction::Restart
        }
        WatchErrorClass::Throttled => {
            let delay = backoff.next_backoff();
            warn!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "API server throttling or reinitializing storage, backing off before restart"
            );
            tokio::time::sleep(delay).await;
            WatchErrorAction::Restart
        }
        WatchErrorClass::NotFound => {
            warn!(
                "VaultSecret not found (404) - normal for deleted resources, otherwise check the CRD is installed. Error: {}",
                error_string
            );
            WatchErrorAction::Continue
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            WatchErrorAction::Restart
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("ApiError: Unauthorized (ErrorResponse { code: 401 })"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorClass::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorClass::Throttled
        );
        assert_eq!(
            classify_watch_error("WatchFailed: invalid type: integer `404`"),
            WatchErrorClass::NotFound
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorClass::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_backs_off_and_restarts() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let action =
            handle_watch_stream_error("429 TooManyRequests", &mut backoff, Duration::from_secs(5))
                .await;
        assert_eq!(action, WatchErrorAction::Restart);
        assert_eq!(backoff.attempts(), 1);
    }
}
