//! Error types for clickhouse-stream.

use std::sync::Arc;

use thiserror::Error;

use crate::types::RequestInfo;

/// Error type for clickhouse-stream operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response status was available.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// ClickHouse answered with a non-success status.
    #[error("ClickHouse returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response text, usually the server's exception message.
        body: String,
        /// Transport diagnostics for the failed request.
        info: RequestInfo,
    },

    /// Failed to decode a JSON response body.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured base URL could not be parsed.
    #[error("Invalid ClickHouse URL '{0}'")]
    InvalidUrl(String),

    /// Rows handed to one insert do not share the same shape.
    #[error("Insert row {row} does not match the first row: {message}")]
    InsertShape {
        /// Zero-based index of the offending row.
        row: usize,
        /// What differs.
        message: String,
    },

    /// Error produced by a user supplied error hook.
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),

    /// I/O error while staging insert data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap any error type, typically from inside an [`ErrorHook`].
    pub fn custom<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Custom(err.into())
    }

    /// HTTP status of a failed request, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Hook every failed request passes through before it is returned.
///
/// The default is the identity. Callers that want their own error type can
/// map into [`Error::Custom`], or log and rethrow.
pub type ErrorHook = Arc<dyn Fn(Error) -> Error + Send + Sync>;

/// Result type alias for clickhouse-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
