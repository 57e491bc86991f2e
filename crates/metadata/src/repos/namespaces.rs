//! Namespace repository.

use crate::error::MetadataResult;
use crate::models::NamespaceRow;
use async_trait::async_trait;
use wharf_core::RetentionWindow;

/// Repository for namespaces and their retention settings.
#[async_trait]
pub trait NamespaceRepo: Send + Sync {
    /// Create a namespace. Fails with `AlreadyExists` if the name is taken.
    async fn create_namespace(
        &self,
        name: &str,
        window: RetentionWindow,
    ) -> MetadataResult<NamespaceRow>;

    async fn get_namespace(&self, namespace_id: i64) -> MetadataResult<Option<NamespaceRow>>;

    async fn get_namespace_by_name(&self, name: &str) -> MetadataResult<Option<NamespaceRow>>;

    /// Update the removed-tag expiration window. Returns `NotFound` for unknown namespaces.
    async fn set_removed_tag_expiration(
        &self,
        namespace_id: i64,
        window: RetentionWindow,
    ) -> MetadataResult<()>;

    /// Distinct retention windows configured across all namespaces, ascending.
    async fn list_retention_windows(&self) -> MetadataResult<Vec<RetentionWindow>>;
}
