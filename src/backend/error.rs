//! # Backend Errors
//!
//! Classification of backend failures into fatal and retryable kinds.

use crate::controller::reconciler::ErrorKind;
use serde::Deserialize;
use thiserror::Error;

/// Backend error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// 401/403: token missing, expired or lacking policy
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// 404: mount, path or role does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// 429: request rate exceeded
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// 5xx, connect errors, timeouts, sealed or standby backend
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// 400 or a response the controller cannot interpret
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Call abandoned because the resource was deleted or resynced
    #[error("call cancelled")]
    Cancelled,
}

/// Vault error body: `{"errors": ["..."]}`
#[derive(Debug, Deserialize)]
struct VaultErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

impl BackendError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<VaultErrorResponse>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => {
                format!("HTTP {status}: {}", parsed.errors.join("; "))
            }
            _ if body.trim().is_empty() => format!("HTTP {status}"),
            _ => format!("HTTP {status}: {}", truncate(body.trim(), 256)),
        };
        match status {
            400 => BackendError::InvalidRequest(message),
            401 | 403 => BackendError::Unauthenticated(message),
            404 => BackendError::NotFound(message),
            // Performance standby not yet consistent with the active node
            412 => BackendError::Unavailable(message),
            429 => BackendError::RateLimited(message),
            500..=599 => BackendError::Unavailable(message),
            _ => BackendError::InvalidRequest(message),
        }
    }

    /// Classify a transport-level failure
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_decode() {
            return BackendError::InvalidRequest(format!("malformed response: {error}"));
        }
        BackendError::Unavailable(error.to_string())
    }

    /// Whether the call may succeed if retried unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited(_) | BackendError::Unavailable(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            BackendError::NotFound(_) => ErrorKind::NotFound,
            BackendError::RateLimited(_) => ErrorKind::RateLimited,
            BackendError::Unavailable(_) => ErrorKind::Unavailable,
            BackendError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BackendError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            BackendError::from_status(400, ""),
            BackendError::InvalidRequest(_)
        ));
        assert!(matches!(
            BackendError::from_status(401, ""),
            BackendError::Unauthenticated(_)
        ));
        assert!(matches!(
            BackendError::from_status(403, ""),
            BackendError::Unauthenticated(_)
        ));
        assert!(matches!(
            BackendError::from_status(404, ""),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            BackendError::from_status(429, ""),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            BackendError::from_status(503, ""),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            BackendError::from_status(418, ""),
            BackendError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_vault_error_messages_are_joined() {
        let error = BackendError::from_status(503, r#"{"errors":["Vault is sealed"]}"#);
        assert_eq!(
            error,
            BackendError::Unavailable("HTTP 503: Vault is sealed".to_string())
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(BackendError::RateLimited(String::new()).is_retryable());
        assert!(BackendError::Unavailable(String::new()).is_retryable());
        assert!(!BackendError::NotFound(String::new()).is_retryable());
        assert!(!BackendError::Unauthenticated(String::new()).is_retryable());
        assert!(!BackendError::InvalidRequest(String::new()).is_retryable());
        assert!(!BackendError::Cancelled.is_retryable());
    }
}
