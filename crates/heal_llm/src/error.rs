//! Error types for the inference adapters.

use std::time::Duration;

use heal_core::InferenceError;
use thiserror::Error;

/// Result type for adapter operations.
pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// No usable provider credentials
    #[error("LLM not configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_URL")]
    NotConfigured,

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("{provider} API error {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Server errors, rate limiting and network failures may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) | Self::Network(_) => true,
            _ => false,
        }
    }
}

impl From<LlmError> for InferenceError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::NotConfigured | LlmError::UnknownProvider(_) => InferenceError::NotConfigured,
            LlmError::Timeout(d) => InferenceError::Timeout(d),
            LlmError::Http { status, .. } if status == 401 || status == 403 => {
                InferenceError::Unauthorized(err.to_string())
            }
            e if e.is_transient() => InferenceError::Transport(e.to_string()),
            e @ LlmError::InvalidResponse(_) => InferenceError::Parse(e.to_string()),
            e => InferenceError::Rejected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_core::Transient;

    fn http(status: u16) -> LlmError {
        LlmError::Http {
            provider: "OpenAI".into(),
            status,
            body: "{}".into(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(InferenceError::from(http(401)), InferenceError::Unauthorized(_)));
        assert!(matches!(InferenceError::from(http(403)), InferenceError::Unauthorized(_)));
        assert!(matches!(InferenceError::from(http(429)), InferenceError::Transport(_)));
        assert!(matches!(InferenceError::from(http(502)), InferenceError::Transport(_)));
        assert!(matches!(InferenceError::from(http(400)), InferenceError::Rejected(_)));
    }

    #[test]
    fn test_mapped_errors_drive_retry_decisions() {
        let timeout = InferenceError::from(LlmError::Timeout(Duration::from_secs(3)));
        assert_eq!(timeout, InferenceError::Timeout(Duration::from_secs(3)));
        assert!(timeout.is_transient());

        let unauthorized = InferenceError::from(http(401));
        assert!(!unauthorized.is_transient());
        assert!(unauthorized.is_fatal());

        let rejected = InferenceError::from(http(404));
        assert!(!rejected.is_transient());
        assert!(!rejected.is_fatal());

        assert!(InferenceError::from(LlmError::NotConfigured).is_fatal());
        assert!(InferenceError::from(LlmError::InvalidResponse("no choices".into())).is_transient());
    }
}
