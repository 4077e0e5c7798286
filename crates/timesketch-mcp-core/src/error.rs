//! Error taxonomy shared by every layer.
//!
//! Retry decisions and transport status codes are made on [`ErrorKind`],
//! never on message text.

use thiserror::Error;

/// Coarse classification of a [`TimesketchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    SearchFailed,
    MalformedResponse,
    Connection,
}

impl ErrorKind {
    /// Machine-readable code used in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "bad_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SearchFailed => "search_failed",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Connection => "upstream_unavailable",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimesketchError {
    /// Caller-supplied arguments were rejected before any remote call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A sketch (or its index) did not resolve.
    #[error("{0} not found")]
    NotFound(String),

    /// The remote query was rejected or failed to execute.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// The remote response did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The client could not be constructed or the service was unreachable.
    #[error("connection error: {0}")]
    Connection(String),
}

impl TimesketchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TimesketchError::InvalidInput(_) => ErrorKind::InvalidInput,
            TimesketchError::NotFound(_) => ErrorKind::NotFound,
            TimesketchError::SearchFailed(_) => ErrorKind::SearchFailed,
            TimesketchError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            TimesketchError::Connection(_) => ErrorKind::Connection,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn sketch_not_found(sketch_id: i64) -> Self {
        TimesketchError::NotFound(format!("sketch with ID {}", sketch_id))
    }
}

pub type Result<T> = std::result::Result<T, TimesketchError>;
