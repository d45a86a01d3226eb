//! Error types for cycles, processors, and transports.

use thiserror::Error;

use crate::cycle::CycleId;
use crate::transport::TaskId;

/// Result type for Tether HTTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers and completion handlers.
#[derive(Debug, Error)]
pub enum Error {
    /// The URL could not be constructed, even after re-encoding it.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A processor received a payload of the wrong shape.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The payload kind the processor accepts.
        expected: &'static str,
        /// The payload kind actually supplied.
        found: &'static str,
    },

    /// A string or credential could not be encoded.
    #[error("Encoding failure: {0}")]
    EncodingFailure(String),

    /// A service profile file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A service profile is structurally invalid.
    #[error("Malformed profile: {0}")]
    MalformedProfile(String),

    /// The named resource is not part of the service profile.
    #[error("Resource not found in profile: {0}")]
    ResourceNotFound(String),

    /// An identifier is required for the requested operation.
    #[error("An identifier is required to reuse or replace a cycle")]
    MissingIdentifier,

    /// The response status was classified as a failure.
    #[error("Status code seems to have erred: {status}")]
    StatusSeemsToHaveErred {
        /// HTTP status code of the response.
        status: u16,
    },

    /// The transport failed to complete the transfer.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A processor direction that is intentionally unsupported was invoked.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The cycle is already registered with the session.
    #[error("Cycle {0} is already registered")]
    DuplicateCycle(CycleId),

    /// Another live cycle already uses the identifier.
    #[error("Duplicate cycle identifier: {0}")]
    DuplicateIdentifier(String),

    /// No live cycle is bound to the task.
    #[error("No cycle is bound to task {0}")]
    CycleNotFound(TaskId),

    /// A download cycle was started without a download-finished handler.
    #[error("Download cycle {0} has no download-finished handler")]
    MissingDownloadHandler(CycleId),

    /// The cycle was cancelled before it produced a result.
    #[error("Cycle was cancelled")]
    Cancelled,
}

impl Error {
    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Transport(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Check if this is a transport timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Get the HTTP status code if the status was treated as a failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::StatusSeemsToHaveErred { status } => Some(*status),
            _ => None,
        }
    }
}

/// Errors reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transfer timed out.
    #[error("Request timed out")]
    TimedOut,

    /// The transfer was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// The transport no longer accepts new tasks.
    #[error("Transport has been invalidated")]
    Invalidated,

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while reading an upload source or writing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut) || matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if the transfer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_)) || matches!(self, Self::Http(e) if e.is_connect())
    }
}
