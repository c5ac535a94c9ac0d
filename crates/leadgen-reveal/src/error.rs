//! Error types for the reveal pipeline.

use leadgen_core::CorrelationKey;
use thiserror::Error;

/// Errors that can occur in the reveal pipeline.
///
/// Per-sub-batch failures are captured into the sub-batch status by the
/// orchestrator; only option validation surfaces from `submit` itself.
#[derive(Error, Debug)]
pub enum RevealError {
    /// Network/HTTP failure calling the remote provider
    #[error("transport error (status {status:?}): {message}")]
    Transport {
        /// HTTP status code, if a response was received
        status: Option<u16>,
        /// Error message
        message: String,
    },

    /// Provider returned 2xx but the body could not be read; the reveal was
    /// accepted and billed
    #[error("provider accepted the request but the response was unreadable: {0}")]
    UnreadableAcceptance(String),

    /// Daily quota would be exceeded
    #[error("daily quota exceeded: requested {requested}, remaining {remaining}")]
    QuotaExceeded {
        /// Credits the caller asked for
        requested: u32,
        /// Credits left in the current window
        remaining: u32,
    },

    /// Correlation key is already tracked
    #[error("correlation key already registered: {key}")]
    DuplicateKey {
        /// The colliding key
        key: CorrelationKey,
    },

    /// Inbound webhook payload failed schema validation
    #[error("malformed webhook payload: {0}")]
    MalformedWebhook(String),

    /// More tokens requested than the bucket can ever hold
    #[error("requested {requested} tokens exceeds bucket capacity {capacity}")]
    CapacityExceeded {
        /// Tokens requested
        requested: u32,
        /// Bucket capacity
        capacity: u32,
    },

    /// Invalid batch options
    #[error("invalid batch options: {0}")]
    InvalidOptions(String),

    /// Downstream record sink rejected a write
    #[error("record sink error: {0}")]
    Sink(String),

    /// Operation cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying HTTP client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RevealError {
    /// Whether retrying the same read could succeed.
    ///
    /// Only used for idempotent reads; submissions are never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { status, .. } => {
                status.map_or(true, |code| code == 429 || code >= 500)
            }
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Whether the provider accepted (and billed) the request despite the error.
    #[must_use]
    pub fn provider_accepted(&self) -> bool {
        matches!(self, Self::UnreadableAcceptance(_))
    }
}

/// Result type alias for reveal operations.
pub type Result<T> = std::result::Result<T, RevealError>;
