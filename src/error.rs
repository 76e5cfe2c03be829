//! Error taxonomy for the provider and its sub-components.

use std::time::Duration;
use thiserror::Error;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Unified error taxonomy (spec §7).
///
/// `Cancelled` is an internal sentinel produced when a request is aborted
/// because its `ConnectionContext` was torn down. It is swallowed by every
/// internal caller and must never reach an `error(e)` observer.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("stream not found: {url}")]
    NotFound { url: String },

    #[error("stream already exists with different configuration")]
    Conflict,

    #[error("append already exists at this position")]
    ConflictExists,

    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    #[error("stale epoch: server has epoch {current_epoch}")]
    StaleEpoch { current_epoch: u64 },

    #[error("offset gone (retention/compaction): {offset}")]
    OffsetGone { offset: String },

    #[error("invalid request: {message}")]
    BadRequest { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server busy: {status}")]
    ServerBusy { status: u16 },

    #[error("timeout")]
    Timeout,

    #[error("network error: {message}")]
    Network { message: String },

    #[error("framing error: {0}")]
    Framing(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// Internal sentinel: the request's connection context was cancelled.
    /// Never surfaced through a public `error(e)` observer.
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Build a `ProviderError` from an HTTP status code and the raw
    /// response headers relevant to producer fencing (§4.B status table).
    pub fn from_status(
        status: u16,
        url: &str,
        retry_after: Option<Duration>,
        expected_seq: Option<u64>,
        current_epoch: Option<u64>,
    ) -> Self {
        match status {
            400 => ProviderError::BadRequest {
                message: "bad request".to_string(),
            },
            401 => ProviderError::Unauthorized,
            403 => match current_epoch {
                Some(epoch) => ProviderError::StaleEpoch {
                    current_epoch: epoch,
                },
                None => ProviderError::Forbidden,
            },
            404 => ProviderError::NotFound {
                url: url.to_string(),
            },
            409 => match expected_seq {
                Some(expected) => ProviderError::SequenceGap {
                    expected,
                    received: 0,
                },
                None => ProviderError::Conflict,
            },
            410 => ProviderError::OffsetGone {
                offset: String::new(),
            },
            429 => ProviderError::RateLimited { retry_after },
            s if s >= 500 => ProviderError::ServerBusy { status: s },
            s => ProviderError::ServerBusy { status: s },
        }
    }

    /// Whether this error is recoverable by bounded internal retry,
    /// independent of the component-specific recovery policy in spec §7.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::ServerBusy { .. }
                | ProviderError::Network { .. }
                | ProviderError::Timeout
        )
    }

    /// HTTP status code, if this error originated from one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::NotFound { .. } => Some(404),
            ProviderError::Conflict | ProviderError::ConflictExists => Some(409),
            ProviderError::SequenceGap { .. } => Some(409),
            ProviderError::StaleEpoch { .. } | ProviderError::Forbidden => Some(403),
            ProviderError::Unauthorized => Some(401),
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::BadRequest { .. } => Some(400),
            ProviderError::ServerBusy { status } => Some(*status),
            ProviderError::OffsetGone { .. } => Some(410),
            _ => None,
        }
    }

    /// Whether spec §7 treats this error as fatal to the provider
    /// (must `emit error(e)` and `disconnect()`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Unauthorized
                | ProviderError::Forbidden
                | ProviderError::OffsetGone { .. }
                | ProviderError::BadRequest { .. }
                | ProviderError::Parse(_)
                | ProviderError::Framing(_)
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

/// Producer-specific errors (spec §4.D / §7).
#[derive(Debug, Clone, Error)]
pub enum ProducerError {
    #[error("producer is closed")]
    Closed,

    #[error("stale epoch: server has epoch {server_epoch}, we have {our_epoch}")]
    StaleEpoch { server_epoch: u64, our_epoch: u64 },

    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("stream error: {message}")]
    Stream { message: String },
}

impl From<reqwest::Error> for ProducerError {
    fn from(err: reqwest::Error) -> Self {
        ProducerError::Stream {
            message: ProviderError::from(err).to_string(),
        }
    }
}

impl From<ProviderError> for ProducerError {
    fn from(err: ProviderError) -> Self {
        ProducerError::Stream {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_forbidden_with_epoch_as_stale_epoch() {
        let err = ProviderError::from_status(403, "u", None, None, Some(3));
        assert!(matches!(err, ProviderError::StaleEpoch { current_epoch: 3 }));
    }

    #[test]
    fn classifies_forbidden_without_epoch_as_forbidden() {
        let err = ProviderError::from_status(403, "u", None, None, None);
        assert!(matches!(err, ProviderError::Forbidden));
    }

    #[test]
    fn classifies_conflict_with_expected_seq_as_sequence_gap() {
        let err = ProviderError::from_status(409, "u", None, Some(7), None);
        assert!(matches!(err, ProviderError::SequenceGap { expected: 7, .. }));
    }

    #[test]
    fn fatal_errors_match_spec_table() {
        assert!(ProviderError::Unauthorized.is_fatal());
        assert!(ProviderError::OffsetGone { offset: "x".into() }.is_fatal());
        assert!(!ProviderError::RateLimited { retry_after: None }.is_fatal());
        assert!(!ProviderError::NotFound { url: "x".into() }.is_fatal());
    }
}
