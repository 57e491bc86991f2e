//! Tag repository.
//!
//! Tags are never updated in place except to end them. Pointing a name at a
//! new target ends the active row and inserts a fresh one, so the history of
//! a name is the sequence of its rows.

use crate::error::MetadataResult;
use crate::models::{TagRow, TagTarget};
use async_trait::async_trait;

#[async_trait]
pub trait TagRepo: Send + Sync {
    /// Point `name` at `target` as of `now_ms`.
    ///
    /// Ends the currently active row for the name (if any) and inserts a new
    /// row starting at `now_ms`. `lifetime_end_ms` schedules the end of the
    /// new row; a future end keeps it active until then.
    async fn retarget_tag(
        &self,
        repository_id: i64,
        name: &str,
        target: TagTarget,
        now_ms: i64,
        lifetime_end_ms: Option<i64>,
    ) -> MetadataResult<TagRow>;

    /// End the active row for `name`. Returns the ended row, or `None` if no
    /// row was active.
    async fn delete_tag(
        &self,
        repository_id: i64,
        name: &str,
        now_ms: i64,
    ) -> MetadataResult<Option<TagRow>>;

    /// The row currently active for `name`.
    async fn get_active_tag(
        &self,
        repository_id: i64,
        name: &str,
        now_ms: i64,
    ) -> MetadataResult<Option<TagRow>>;

    /// All rows of a repository, ended ones included.
    async fn list_tags(&self, repository_id: i64) -> MetadataResult<Vec<TagRow>>;
}
