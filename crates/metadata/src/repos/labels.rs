//! Label repository.

use crate::error::MetadataResult;
use crate::models::LabelRow;
use async_trait::async_trait;

#[async_trait]
pub trait LabelRepo: Send + Sync {
    async fn get_label(&self, label_id: i64) -> MetadataResult<Option<LabelRow>>;

    /// Labels attached to a manifest.
    async fn list_manifest_labels(&self, manifest_id: i64) -> MetadataResult<Vec<LabelRow>>;
}
