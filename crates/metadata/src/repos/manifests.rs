//! Manifest repository.

use crate::error::MetadataResult;
use crate::models::{ManifestRow, StorageRow};
use async_trait::async_trait;

/// Label attached to a manifest at creation.
#[derive(Debug, Clone)]
pub struct NewLabel {
    pub key: String,
    pub value: String,
    pub media_type: String,
}

impl NewLabel {
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            media_type: "text/plain".to_string(),
        }
    }
}

/// Manifest to be written with its owner records.
#[derive(Debug, Clone)]
pub struct NewManifest {
    pub repository_id: i64,
    pub digest: String,
    pub media_type: String,
    pub manifest_bytes: String,
    /// Storage objects the manifest references (config first, then layers).
    pub blob_ids: Vec<i64>,
    pub labels: Vec<NewLabel>,
}

/// Repository for manifest operations.
#[async_trait]
pub trait ManifestRepo: Send + Sync {
    /// Create a manifest with its blob and label owner records in one transaction.
    ///
    /// If a manifest with the same digest already exists in the repository it
    /// is returned unchanged.
    async fn create_manifest(&self, manifest: &NewManifest) -> MetadataResult<ManifestRow>;

    async fn get_manifest(&self, manifest_id: i64) -> MetadataResult<Option<ManifestRow>>;

    async fn get_manifest_by_digest(
        &self,
        repository_id: i64,
        digest: &str,
    ) -> MetadataResult<Option<ManifestRow>>;

    async fn list_manifests(&self, repository_id: i64) -> MetadataResult<Vec<ManifestRow>>;

    /// Storage objects referenced by a manifest.
    async fn manifest_blobs(&self, manifest_id: i64) -> MetadataResult<Vec<StorageRow>>;
}
