//! Gateway error types.

use std::fmt;

use thiserror::Error;

/// Raw failure reported by the remote service or the transport under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// HTTP status, when the request got that far.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The service answers a stale or revoked key with "not found" on an
    /// otherwise valid request.
    pub fn is_auth_expired(&self) -> bool {
        self.status == Some(404)
            || self.message.contains("Requested entity was not found")
            || self.message.contains("404")
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Normalized generation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The credential is no longer accepted; the user must pick a new one.
    #[error("API key expired or not authorized")]
    ApiKeyExpired,

    #[error("The response did not contain any image data")]
    NoImageInResult,

    #[error("The finished operation did not include a download link")]
    MissingResultLink,

    #[error("Failed to download the generated video: {message}")]
    DownloadFailed { message: String },

    #[error("Remote service error: {0}")]
    Remote(RemoteError),

    /// Polling failed too many times in a row.
    #[error("Gave up polling '{operation_name}' after {failures} consecutive failures")]
    PollingAbandoned {
        operation_name: String,
        failures: u32,
    },
}

impl From<RemoteError> for GatewayError {
    fn from(err: RemoteError) -> Self {
        if err.is_auth_expired() {
            GatewayError::ApiKeyExpired
        } else {
            GatewayError::Remote(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
