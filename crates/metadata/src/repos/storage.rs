//! Storage object repository.

use crate::error::MetadataResult;
use crate::models::{StorageRow, UploadedBlobRow};
use async_trait::async_trait;
use wharf_core::BlobDigest;

/// Repository for storage objects, their placements and upload links.
#[async_trait]
pub trait StorageRepo: Send + Sync {
    /// Get or create a location id by name.
    async fn ensure_location(&self, name: &str) -> MetadataResult<i64>;

    /// Create the storage object for `digest` (or reuse an existing one) and
    /// record its placement in `location`.
    async fn store_blob_record(
        &self,
        digest: &BlobDigest,
        location: &str,
        size: i64,
    ) -> MetadataResult<StorageRow>;

    /// Like [`store_blob_record`](Self::store_blob_record), and additionally
    /// add an uploaded-blob link for `repository_id` expiring at `expires_at_ms`.
    async fn store_blob_record_and_temp_link(
        &self,
        repository_id: i64,
        digest: &BlobDigest,
        location: &str,
        size: i64,
        expires_at_ms: i64,
    ) -> MetadataResult<StorageRow>;

    async fn get_storage(&self, storage_id: i64) -> MetadataResult<Option<StorageRow>>;

    async fn get_storage_by_digest(&self, digest: &BlobDigest)
    -> MetadataResult<Option<StorageRow>>;

    /// Names of the locations holding bytes for a storage object.
    async fn storage_locations(&self, storage_id: i64) -> MetadataResult<Vec<String>>;

    async fn list_uploaded_blobs(&self, repository_id: i64)
    -> MetadataResult<Vec<UploadedBlobRow>>;
}
