//! Error taxonomy for the hub

use thiserror::Error;

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Errors that can occur while ingesting, storing or streaming events
#[derive(Debug, Error)]
pub enum HubError {
    /// Rejected before any persistence; no sequence id is consumed.
    #[error("invalid-payload: {0}")]
    InvalidPayload(String),

    /// The log or the counter file could not be read or written.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] std::io::Error),

    /// A single stored line failed to parse. Readers skip it.
    #[error("malformed record at byte {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl HubError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, HubError::StoreUnavailable(_))
    }

    pub(crate) fn invalid_payload(msg: impl Into<String>) -> Self {
        HubError::InvalidPayload(msg.into())
    }
}
