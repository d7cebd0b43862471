//! Error types for roadlog-core

use thiserror::Error;

/// Main error type for the roadlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Session store error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (data file open/write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed replay trace
    #[error("invalid trace: {0}")]
    Trace(String),

    /// Ring buffer read past the number of valid entries
    #[error("index {index} out of range for ring buffer of size {size}")]
    IndexOutOfRange { index: usize, size: usize },

    /// Mutation of a session after it was finished
    #[error("recording session is closed")]
    SessionClosed,

    /// Session not found in the store
    #[error("session not found: {0}")]
    SessionNotFound(i64),

    /// Logger service is already recording or waiting for a fix
    #[error("logger already running")]
    AlreadyRunning,

    /// Logger service is idle
    #[error("logger not running")]
    NotRunning,

    /// Upload transport or server error
    #[error("upload error: {0}")]
    Upload(String),

    /// A lock was poisoned by a panicking thread
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short, stable name of the error kind for status reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Database(_) | Error::Io(_) => "io",
            Error::Json(_) | Error::Upload(_) => "upload",
            Error::Config(_) => "config",
            Error::Trace(_) => "trace",
            Error::IndexOutOfRange { .. } => "index_out_of_range",
            Error::SessionClosed => "session_closed",
            Error::SessionNotFound(_) => "session_not_found",
            Error::AlreadyRunning => "already_running",
            Error::NotRunning => "not_running",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type alias for roadlog-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::SessionClosed.kind(), "session_closed");
        assert_eq!(
            Error::IndexOutOfRange { index: 5, size: 5 }.kind(),
            "index_out_of_range"
        );
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(io.kind(), "io");
    }

    #[test]
    fn test_error_display() {
        let err = Error::IndexOutOfRange { index: 7, size: 3 };
        assert_eq!(
            err.to_string(),
            "index 7 out of range for ring buffer of size 3"
        );
    }
}
