//! Error types for ledger_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ledger_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while splitting, encoding or reading pieces.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred while reading a byte source.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A binary buffer is malformed, truncated or structurally invalid.
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    /// A buffer decoded cleanly but its content is logically invalid.
    #[error("Data integrity error: {reason}")]
    DataIntegrity { reason: String },

    /// The upstream byte source reported a failure.
    #[error("Source error: {reason}")]
    Source { reason: String },

    /// Store directory is missing or malformed.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Piece not found in the backing store.
    #[error("Piece not found: {digest}")]
    NotFound { digest: String },

    /// An inline-only accessor was used on a hashed digest, or vice versa.
    #[error("Wrong digest kind: expected {expected} digest")]
    WrongDigestKind { expected: &'static str },

    /// Invalid splitter configuration.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a Decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Error::Decode {
            reason: reason.into(),
        }
    }

    /// Create a DataIntegrity error.
    pub fn data_integrity(reason: impl Into<String>) -> Self {
        Error::DataIntegrity {
            reason: reason.into(),
        }
    }

    /// Create a Source error.
    pub fn source_failed(reason: impl Into<String>) -> Self {
        Error::Source {
            reason: reason.into(),
        }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(digest: impl Into<String>) -> Self {
        Error::NotFound {
            digest: digest.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Re-classify a decoding failure of stored bytes as an integrity failure.
    ///
    /// Bytes coming out of the store were valid when written, so any failure
    /// to decode them means the stored data is corrupt.
    pub(crate) fn into_data_integrity(self) -> Self {
        match self {
            Error::Decode { reason } => Error::DataIntegrity { reason },
            other => other,
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}
