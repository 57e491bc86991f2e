//! Byte store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("byte store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob path: {0}")]
    InvalidKey(String),

    #[error("location {0} is not configured")]
    UnknownLocation(String),

    #[error("no configured location to write {0}")]
    NoLocation(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
