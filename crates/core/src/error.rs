//! Error types for hearth
//!
//! One unified `Error` spans all layers so the `?` operator composes across
//! crate boundaries. Module-local failure detail (JSON codec, context
//! parsing) converts in via `#[from]`.

use crate::context::ContextPathError;
use crate::json::JsonError;
use std::io;
use thiserror::Error;

/// Result type alias for hearth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the hearth storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, fsync, rename)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Extended-JSON encode/decode error
    #[error("serialization error: {0}")]
    Json(#[from] JsonError),

    /// Invalid context path or key
    #[error("invalid context: {0}")]
    Context(#[from] ContextPathError),

    /// On-disk data failed an integrity or format check
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Operation on a transaction that is no longer active
    #[error("transaction already {state}")]
    TransactionClosed {
        /// The terminal state the transaction is in ("committed" or
        /// "rolled back")
        state: &'static str,
    },

    /// Storage layer failure that is not a plain I/O error
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Build a `Corruption` error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption(message.into())
    }

    /// Build a `Storage` error.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }

    /// Whether this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Whether this error came from a closed transaction.
    pub fn is_transaction_closed(&self) -> bool {
        matches!(self, Error::TransactionClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().contains("I/O error"));

        let err = Error::corruption("bad line");
        assert!(err.to_string().contains("bad line"));
        assert!(err.is_corruption());

        let err = Error::TransactionClosed { state: "committed" };
        assert!(err.to_string().contains("committed"));
        assert!(err.is_transaction_closed());
    }

    #[test]
    fn test_from_conversions() {
        fn io_failure() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))?;
            Ok(())
        }
        assert!(matches!(io_failure(), Err(Error::Io(_))));

        let err: Error = crate::context::ContextPath::new([""]).unwrap_err().into();
        assert!(matches!(err, Error::Context(_)));
    }
}
