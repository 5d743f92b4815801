//! Streamer and transport error types
//!
//! `StreamerError` is what callers of the session streamer see. `TransportError`
//! is produced by `HttpTransport` implementations and folded into
//! `StreamerError::ServiceUnavailable` by the streamer.

use thiserror::Error;

/// Default cap on a single response body (64 MB).
/// Chunks and checkpoints are far smaller; anything bigger is a misbehaving server.
pub const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// Errors surfaced by the session streamer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamerError {
    /// A transport call failed or returned an unexpected status.
    /// Latched as the sticky last error when raised by the request pipeline.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// API misuse; existing state is left untouched.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Soft condition: the requested bytes are not buffered (yet).
    #[error("No data: requested {requested} bytes, {available} available")]
    NoData { requested: usize, available: usize },
}

impl StreamerError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub(crate) fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// `true` for errors that never latch and can simply be retried later.
    #[must_use]
    pub const fn is_soft(&self) -> bool {
        matches!(self, Self::NoData { .. })
    }
}

/// Errors produced by an `HttpTransport`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Response too large ({size} bytes, max {limit})")]
    ResponseTooLarge { size: u64, limit: usize },

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for TransportError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<TransportError> for StreamerError {
    fn from(err: TransportError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamerError>;
