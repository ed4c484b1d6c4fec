//! Error taxonomy for collaborator calls
//!
//! Every variant is local: it is reported once by the caller and discarded.
//! Nothing here is queued for retry.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    /// Position or microphone access was refused
    #[error("permission denied for {subsystem}")]
    PermissionDenied { subsystem: &'static str },

    /// Transport failure talking to an external service
    #[error("network failure ({service}): {message}")]
    Network { service: &'static str, message: String },

    /// External call exceeded its configured timeout
    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: &'static str, timeout: Duration },

    /// Dispatch attempted with an empty contact list
    #[error("no emergency contacts configured")]
    NoContacts,

    /// Audio capture failed
    #[error("recording failed: {0}")]
    Recording(String),

    /// Collaborator not usable in this environment
    #[error("{0} unavailable")]
    Unavailable(&'static str),

    /// Malformed payload from an external source
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl SafetyError {
    pub fn network(service: &'static str, err: impl std::fmt::Display) -> Self {
        SafetyError::Network { service, message: err.to_string() }
    }

    /// Short label for metrics and incident records
    pub fn kind(&self) -> &'static str {
        match self {
            SafetyError::PermissionDenied { .. } => "permission_denied",
            SafetyError::Network { .. } => "network_failure",
            SafetyError::Timeout { .. } => "timeout",
            SafetyError::NoContacts => "no_contacts",
            SafetyError::Recording(_) => "recording_failure",
            SafetyError::Unavailable(_) => "unavailable",
            SafetyError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

pub type SafetyResult<T> = Result<T, SafetyError>;

/// Run a collaborator future under a timeout, mapping expiry to `SafetyError::Timeout`
pub async fn with_timeout<T, F>(service: &'static str, timeout: Duration, fut: F) -> SafetyResult<T>
where
    F: std::future::Future<Output = SafetyResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SafetyError::Timeout { service, timeout }),
    }
}
