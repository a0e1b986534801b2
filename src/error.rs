//! Muninn error types

use std::time::Duration;

/// HTTP statuses the upstream API uses for transient conditions.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Muninn error types.
///
/// Errors are `Clone` so that every caller coalesced onto one in-flight
/// request receives its own copy of the terminal outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MuninnError {
    // Caller errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("client not started, call start() first")]
    NotStarted,

    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    // Data errors
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    #[error("empty response from model")]
    EmptyResponse,

    // Lifecycle
    #[error("request cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Closed classification of [`MuninnError`], assigned where the error is
/// produced. Collaborators branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request. Never retried.
    InputValidation,
    /// Network failure, timeout, or a retryable HTTP status.
    Transient,
    /// Non-retryable HTTP status, or a reply body the client cannot use.
    Upstream,
    /// Facade used before `start()` or after `close()`.
    NotStarted,
    /// Work aborted by `close()`.
    Cancelled,
    Configuration,
    Internal,
}

impl MuninnError {
    /// Build an [`MuninnError::Api`] without a retry hint.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        MuninnError::Api {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MuninnError::InvalidInput(_) => ErrorKind::InputValidation,
            MuninnError::InvalidResponse(_) | MuninnError::EmptyResponse => ErrorKind::Upstream,
            MuninnError::Http(_) | MuninnError::Timeout(_) => ErrorKind::Transient,
            MuninnError::Api { status, .. } if RETRYABLE_STATUSES.contains(status) => {
                ErrorKind::Transient
            }
            MuninnError::Api { .. } => ErrorKind::Upstream,
            MuninnError::NotStarted => ErrorKind::NotStarted,
            MuninnError::Cancelled => ErrorKind::Cancelled,
            MuninnError::Configuration(_) => ErrorKind::Configuration,
            MuninnError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is worth retrying on its own merits.
    ///
    /// Unclassified [`MuninnError::Internal`] errors count as transient;
    /// the attempt budget bounds them.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Internal)
    }

    /// Upstream `Retry-After` hint, if the API sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MuninnError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MuninnError {
    fn from(err: serde_json::Error) -> Self {
        MuninnError::InvalidResponse(err.to_string())
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
