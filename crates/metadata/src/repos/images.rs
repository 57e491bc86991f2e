//! Legacy image repository.

use crate::error::MetadataResult;
use crate::models::{DerivedStorageRow, ImageRow};
use async_trait::async_trait;

#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Create an image node owning `storage_id`, optionally linked to a parent.
    async fn create_image(
        &self,
        repository_id: i64,
        docker_image_id: &str,
        storage_id: i64,
        parent_id: Option<i64>,
    ) -> MetadataResult<ImageRow>;

    async fn get_image(&self, image_id: i64) -> MetadataResult<Option<ImageRow>>;

    async fn list_images(&self, repository_id: i64) -> MetadataResult<Vec<ImageRow>>;

    /// Record a storage object derived from an image.
    async fn create_derived_storage(
        &self,
        source_image_id: i64,
        derivative_id: i64,
        transformation: &str,
    ) -> MetadataResult<DerivedStorageRow>;

    async fn list_derived_storage(
        &self,
        source_image_id: i64,
    ) -> MetadataResult<Vec<DerivedStorageRow>>;
}
