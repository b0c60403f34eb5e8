//! Error types for the capture core
//!
//! Errors are classified so the scheduler can decide between a chunk-scoped
//! retry and a terminal failure of the whole capture:
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Configuration | `Config`, `UnsupportedCharset` | reported before any chunk work |
//! | Transient I/O | `Transient`, `ConnectionClosed`, `Timeout`, `Io` | chunk retried with fresh watermarks |
//! | Consistency | `ConsistencyViolation` | chunk retried with fresh watermarks |
//! | Fatal | `Fatal` | capture terminates |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid settings or table metadata
    Configuration,
    /// Query or log read failures, connection resets
    Transient,
    /// Watermark ordering broken or log position unreachable
    Consistency,
    /// Column bytes not valid for the declared charset
    Decoding,
    /// Retry budget exhausted
    Fatal,
    /// Other/unknown errors
    Other,
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Declared charset has no codec
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// Bytes are not valid in the declared charset
    #[error("Cannot decode column as {charset}: {reason}")]
    Decode { charset: String, reason: String },

    /// Query or log read failure that may succeed on retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// Connection closed by the collaborator
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Watermark protocol broken for a chunk
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Retry budget exhausted; global ordering can no longer be guaranteed
    #[error("Fatal protocol error on chunk {chunk} after {attempts} attempts: {source}")]
    Fatal {
        chunk: u32,
        attempts: u32,
        #[source]
        source: Box<CdcError>,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CdcError {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an unsupported charset error
    pub fn unsupported_charset(name: impl Into<String>) -> Self {
        Self::UnsupportedCharset(name.into())
    }

    /// Create a decode error
    pub fn decode(charset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            charset: charset.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a consistency violation
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::ConsistencyViolation(msg.into())
    }

    /// Escalate a chunk error once the retry budget is spent
    pub fn fatal(chunk: u32, attempts: u32, source: CdcError) -> Self {
        Self::Fatal {
            chunk,
            attempts,
            source: Box::new(source),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Consistency violations are retriable because a chunk retry takes fresh
    /// watermarks.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transient(_)
            | Self::ConnectionClosed
            | Self::Timeout(_)
            | Self::ConsistencyViolation(_) => true,

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Config(_)
            | Self::UnsupportedCharset(_)
            | Self::Decode { .. }
            | Self::Fatal { .. }
            | Self::Json(_)
            | Self::InvalidState(_) => false,
        }
    }

    /// Check if this error terminates the capture.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::UnsupportedCharset(_) => ErrorCategory::Configuration,
            Self::Transient(_) | Self::ConnectionClosed | Self::Timeout(_) | Self::Io(_) => {
                ErrorCategory::Transient
            }
            Self::ConsistencyViolation(_) => ErrorCategory::Consistency,
            Self::Decode { .. } => ErrorCategory::Decoding,
            Self::Fatal { .. } => ErrorCategory::Fatal,
            Self::Json(_) | Self::InvalidState(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::UnsupportedCharset(_) => "unsupported_charset",
            Self::Decode { .. } => "decode_error",
            Self::Transient(_) => "transient_error",
            Self::ConnectionClosed => "connection_closed",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io_error",
            Self::ConsistencyViolation(_) => "consistency_violation",
            Self::Fatal { .. } => "fatal_protocol_error",
            Self::Json(_) => "json_error",
            Self::InvalidState(_) => "invalid_state",
        }
    }
}

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CdcError>;
