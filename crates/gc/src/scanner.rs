//! Garbage scanner: find a repository worth collecting.

use crate::collector::GarbageCollector;
use crate::error::GcResult;
use time::{Duration, OffsetDateTime};
use wharf_core::{RetentionWindow, timestamp};
use wharf_metadata::models::RepositoryRow;

fn threshold_ms(threshold: Duration) -> i64 {
    i64::try_from(threshold.whole_milliseconds().max(0)).unwrap_or(i64::MAX)
}

impl GarbageCollector {
    /// A repository holding a tag row that left its retention window at
    /// least `threshold` ago, or `None`.
    pub async fn find_repository_with_garbage(
        &self,
        threshold: Duration,
    ) -> GcResult<Option<RepositoryRow>> {
        self.find_repository_with_garbage_at(threshold, None, &[], OffsetDateTime::now_utc())
            .await
    }

    /// As [`find_repository_with_garbage`](Self::find_repository_with_garbage),
    /// restricted to namespaces using `policy` when given and skipping the
    /// repositories in `exclude`.
    pub async fn find_repository_with_garbage_at(
        &self,
        threshold: Duration,
        policy: Option<RetentionWindow>,
        exclude: &[i64],
        now: OffsetDateTime,
    ) -> GcResult<Option<RepositoryRow>> {
        let found = self
            .metadata
            .find_repository_with_garbage(
                timestamp::to_millis(now),
                threshold_ms(threshold),
                policy,
                exclude,
            )
            .await?;
        if let Some(repository) = &found {
            tracing::debug!(
                repository_id = repository.repository_id,
                threshold_secs = threshold.whole_seconds(),
                "Found repository with garbage"
            );
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ms() {
        assert_eq!(threshold_ms(Duration::seconds(2)), 2_000);
        assert_eq!(threshold_ms(Duration::seconds(-5)), 0);
        assert_eq!(threshold_ms(Duration::MAX), i64::MAX);
    }
}
