use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Key not found. Recoverable: callers usually map it to `None`.
    #[error("Not found")]
    NotFound,
    /// Data corruption detected (CRC mismatch, bad format, truncated record).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// IO error from the underlying storage.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// API misuse, e.g. opening a database with a different comparator.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Copy of this error for the sticky background-error slot.
    /// `io::Error` is not `Clone`, so the kind and message are carried over.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::NotFound => Error::NotFound,
            Error::Corruption(msg) => Error::Corruption(msg.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::InvalidArgument(msg) => Error::InvalidArgument(msg.clone()),
        }
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
