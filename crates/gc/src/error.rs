//! Garbage collection error types.

use thiserror::Error;
use wharf_metadata::MetadataError;
use wharf_storage::StorageError;

/// Errors surfaced by collection, purge and the scanner.
///
/// Byte-store delete failures are not in here: they are logged and counted,
/// and the catalog changes stand.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(i64),

    /// An owner row points at a storage object that no longer exists.
    #[error("inconsistent reference: {owner} references missing storage object {storage_id}")]
    InconsistentReference { owner: &'static str, storage_id: i64 },
}

impl GcError {
    /// Whether the caller should retry with a fresh snapshot.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Metadata(e) if e.is_transient())
    }
}

/// Result type for garbage collection.
pub type GcResult<T> = std::result::Result<T, GcError>;
