//! Repository purge: remove a repository and everything only it owned.

use crate::collector::{CollectionReport, GarbageCollector, rollback_quietly};
use crate::error::{GcError, GcResult};
use crate::metrics;
use crate::reachability::Liveness;
use std::time::Instant;
use time::OffsetDateTime;
use tracing::instrument;
use wharf_core::timestamp;

impl GarbageCollector {
    /// Purge a repository, ignoring retention.
    ///
    /// Without `force` the repository must be marked for deletion; otherwise
    /// nothing happens and `false` is returned.
    pub async fn purge(&self, repository_id: i64, force: bool) -> GcResult<bool> {
        Ok(self
            .purge_with_report(repository_id, force, OffsetDateTime::now_utc())
            .await?
            .is_some())
    }

    /// Purge as of `now`. `None` when the purge was refused.
    #[instrument(skip(self))]
    pub async fn purge_with_report(
        &self,
        repository_id: i64,
        force: bool,
        now: OffsetDateTime,
    ) -> GcResult<Option<CollectionReport>> {
        let started = Instant::now();
        let now_ms = timestamp::to_millis(now);

        let guard = self.locks.lock(repository_id).await;
        let mut tx = self.metadata.begin_catalog_transaction().await?;

        let repository = match tx.repository(repository_id).await {
            Ok(Some(repository)) => repository,
            Ok(None) => {
                rollback_quietly(tx, repository_id).await;
                return Err(GcError::RepositoryNotFound(repository_id));
            }
            Err(e) => {
                rollback_quietly(tx, repository_id).await;
                return Err(e.into());
            }
        };

        if !force && !repository.is_marked_for_deletion() {
            tx.rollback().await?;
            tracing::warn!(
                repository_id,
                state = %repository.state,
                "Refusing to purge repository not marked for deletion"
            );
            return Ok(None);
        }

        let sweep = match self
            .sweep(&mut *tx, &repository, Liveness::NothingAlive, now_ms, true)
            .await
        {
            Ok(sweep) => sweep,
            Err(e) => {
                rollback_quietly(tx, repository_id).await;
                return Err(e);
            }
        };

        tx.commit().await?;
        drop(guard);

        let report = self.finish(sweep).await;
        metrics::REPOSITORIES_PURGED.inc();
        metrics::PASS_DURATION.observe(started.elapsed().as_secs_f64());

        tracing::info!(
            repository_id,
            repository = %repository.name,
            manifests_removed = report.manifests_removed,
            images_removed = report.images_removed,
            storages_reclaimed = report.storages_reclaimed,
            bytes_reclaimed = report.bytes_reclaimed,
            "Repository purged"
        );
        Ok(Some(report))
    }
}
