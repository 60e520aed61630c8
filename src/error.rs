//! Error types for the reverse word index.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`RwiError`] enum. Decode problems met while bulk-loading segments or
//! dumps are logged and skipped by the callers; I/O problems propagate.
//!
//! # Examples
//!
//! ```
//! use rwindex::error::{Result, RwiError};
//!
//! fn open_segment() -> Result<()> {
//!     Err(RwiError::storage("segment header is missing"))
//! }
//!
//! assert!(open_segment().is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for index operations.
#[derive(Error, Debug)]
pub enum RwiError {
    /// I/O errors (segment files, dumps, index files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors (configuration files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record or file could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// In-memory index errors
    #[error("Index error: {0}")]
    Index(String),

    /// Segment storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A caller passed an unusable value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on a closed store
    #[error("Closed: {0}")]
    Closed(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with RwiError.
pub type Result<T> = std::result::Result<T, RwiError>;

impl RwiError {
    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        RwiError::Decode(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        RwiError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        RwiError::Storage(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        RwiError::InvalidArgument(msg.into())
    }

    /// Create a new closed error.
    pub fn closed<S: Into<String>>(msg: S) -> Self {
        RwiError::Closed(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        RwiError::Other(msg.into())
    }

    /// Whether this error came from decoding a damaged record.
    pub fn is_decode(&self) -> bool {
        matches!(self, RwiError::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = RwiError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = RwiError::storage("Test storage error");
        assert_eq!(error.to_string(), "Storage error: Test storage error");

        let error = RwiError::closed("cell");
        assert_eq!(error.to_string(), "Closed: cell");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = RwiError::from(io_error);

        match error {
            RwiError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }
    }

    #[test]
    fn test_decode_classification() {
        assert!(RwiError::decode("short row").is_decode());
        assert!(!RwiError::other("x").is_decode());
    }
}
