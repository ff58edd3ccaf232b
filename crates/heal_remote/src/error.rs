//! Error types for remote clients.

use heal_core::{CoreError, TrackerError, VcsError};
use thiserror::Error;

/// Result type alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("{service} returned {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Request to {service} timed out")]
    Timeout { service: &'static str },

    #[error("Network error talking to {service}: {message}")]
    Network {
        service: &'static str,
        message: String,
    },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    #[error("Cannot derive repository from remote URL '{0}'")]
    InvalidRemote(String),

    #[error("Git error: {0}")]
    Git(#[from] CoreError),
}

impl RemoteError {
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service }
        } else {
            Self::Network {
                service,
                message: err.to_string(),
            }
        }
    }

    /// Whether the server rejected our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Http { status: 401 | 403, .. })
    }

    /// Failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout { .. } | Self::Network { .. } => true,
            _ => false,
        }
    }
}

impl From<RemoteError> for TrackerError {
    fn from(err: RemoteError) -> Self {
        if err.is_auth() {
            TrackerError::Auth(err.to_string())
        } else if err.is_transient() {
            TrackerError::Unreachable(err.to_string())
        } else {
            TrackerError::InvalidResponse(err.to_string())
        }
    }
}

impl From<RemoteError> for VcsError {
    fn from(err: RemoteError) -> Self {
        if err.is_auth() {
            VcsError::Auth(err.to_string())
        } else if err.is_transient() {
            VcsError::Transport(err.to_string())
        } else {
            VcsError::Command(err.to_string())
        }
    }
}
