//! Garbage collection repository and the catalog transaction GC runs inside.

use crate::error::MetadataResult;
use crate::models::{GarbageStats, ImageRow, ManifestRow, RepositoryRow, StorageRow, TagRow};
use async_trait::async_trait;
use wharf_core::RetentionWindow;

/// Repository for garbage collection queries.
#[async_trait]
pub trait GcRepo: Send + Sync {
    /// Pick a repository holding at least one tag row whose retention window
    /// ended at or before `now_ms - threshold_ms`. Random among candidates so
    /// concurrent workers spread out. `policy` restricts the search to
    /// namespaces configured with that window. Repositories in `exclude` are
    /// never returned.
    async fn find_repository_with_garbage(
        &self,
        now_ms: i64,
        threshold_ms: i64,
        policy: Option<RetentionWindow>,
        exclude: &[i64],
    ) -> MetadataResult<Option<RepositoryRow>>;

    /// Counts of rows nothing owns.
    async fn garbage_stats(&self) -> MetadataResult<GarbageStats>;

    /// Open a catalog transaction. All reads and writes of one GC unit go
    /// through it; dropping it without `commit` rolls back.
    async fn begin_catalog_transaction(&self) -> MetadataResult<Box<dyn CatalogTransaction>>;
}

/// Transactional read/write unit over the catalog.
#[async_trait]
pub trait CatalogTransaction: Send {
    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    async fn rollback(self: Box<Self>) -> MetadataResult<()>;

    // ---- reads -----------------------------------------------------------

    async fn repository(&mut self, repository_id: i64) -> MetadataResult<Option<RepositoryRow>>;

    /// Retention window of the namespace owning the repository.
    async fn retention_window(&mut self, repository_id: i64) -> MetadataResult<RetentionWindow>;

    async fn tags(&mut self, repository_id: i64) -> MetadataResult<Vec<TagRow>>;

    async fn manifests(&mut self, repository_id: i64) -> MetadataResult<Vec<ManifestRow>>;

    async fn images(&mut self, repository_id: i64) -> MetadataResult<Vec<ImageRow>>;

    async fn get_storage(&mut self, storage_id: i64) -> MetadataResult<Option<StorageRow>>;

    async fn storage_locations(&mut self, storage_id: i64) -> MetadataResult<Vec<String>>;

    /// Owner rows referencing a storage object across every repository:
    /// manifest blobs, images, uploaded blobs expiring after `now_ms`, and
    /// derived storage.
    async fn storage_owner_count(&mut self, storage_id: i64, now_ms: i64) -> MetadataResult<u64>;

    // ---- writes ----------------------------------------------------------

    async fn delete_tags(&mut self, tag_ids: &[i64]) -> MetadataResult<u64>;

    /// Delete manifest-blob rows of the manifests. Returns the distinct
    /// storage ids they referenced.
    async fn delete_manifest_blobs(&mut self, manifest_ids: &[i64]) -> MetadataResult<Vec<i64>>;

    /// Delete manifest-label rows of the manifests. Returns the distinct label ids.
    async fn delete_manifest_labels(&mut self, manifest_ids: &[i64]) -> MetadataResult<Vec<i64>>;

    /// Delete those labels no manifest references any more. Returns how many went.
    async fn delete_unreferenced_labels(&mut self, label_ids: &[i64]) -> MetadataResult<u64>;

    async fn delete_manifests(&mut self, manifest_ids: &[i64]) -> MetadataResult<u64>;

    /// Delete derived-storage rows of the images. Returns the derivative storage ids.
    async fn delete_derived_storage(&mut self, image_ids: &[i64]) -> MetadataResult<Vec<i64>>;

    /// Delete images in the given order; children must precede their parents.
    async fn delete_images(&mut self, image_ids: &[i64]) -> MetadataResult<u64>;

    /// Delete every uploaded-blob link of a repository. Returns the storage ids.
    async fn delete_uploaded_blobs(&mut self, repository_id: i64) -> MetadataResult<Vec<i64>>;

    /// Delete up to `limit` uploaded-blob links that expired at or before
    /// `now_ms`. Returns the distinct storage ids they pointed at.
    async fn delete_expired_uploaded_blobs(
        &mut self,
        now_ms: i64,
        limit: u32,
    ) -> MetadataResult<Vec<i64>>;

    /// Delete a storage object row with its placements and any expired
    /// upload links. Returns `false` if the row was already gone.
    async fn delete_storage(&mut self, storage_id: i64) -> MetadataResult<bool>;

    /// Delete the repository row and any tag rows left in it.
    async fn delete_repository(&mut self, repository_id: i64) -> MetadataResult<()>;
}
