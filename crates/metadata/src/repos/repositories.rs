//! Repository (image repository) records.

use crate::error::MetadataResult;
use crate::models::{RepositoryRow, RepositoryState};
use async_trait::async_trait;

#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Create a repository inside a namespace.
    async fn create_repository(
        &self,
        namespace_id: i64,
        name: &str,
    ) -> MetadataResult<RepositoryRow>;

    async fn get_repository(&self, repository_id: i64) -> MetadataResult<Option<RepositoryRow>>;

    /// Look a repository up by `namespace/name`.
    async fn get_repository_by_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> MetadataResult<Option<RepositoryRow>>;

    async fn list_repositories(&self) -> MetadataResult<Vec<RepositoryRow>>;

    async fn set_repository_state(
        &self,
        repository_id: i64,
        state: RepositoryState,
    ) -> MetadataResult<()>;
}
