//! The per-location byte store.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Bytes of one storage location, addressed by blob path.
///
/// Paths come from [`DistributedStorage::blob_path`](crate::DistributedStorage::blob_path),
/// so a blob has the same path in every location.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Read a blob. Missing blobs are `StorageError::NotFound`.
    async fn get(&self, path: &str) -> StorageResult<Bytes>;

    /// Write a blob. Readers never observe a partial write.
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<()>;

    /// Remove a blob. Missing blobs are `StorageError::NotFound`, which the
    /// reclaimer treats as already deleted.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Backend kind for logs, e.g. `"filesystem"`.
    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
