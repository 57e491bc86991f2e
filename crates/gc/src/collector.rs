//! Repository collection.
//!
//! One collection pass over a repository runs under the repository lock and
//! inside one catalog transaction: read the snapshot, analyze reachability,
//! delete dead manifests and images with their owner rows, recount owners of
//! the storage objects they released and delete the rows of those left
//! unowned. After commit the bytes are deleted and listeners notified.

use crate::dereference::{Candidates, MissingStorage, Unowned, dereference};
use crate::error::{GcError, GcResult};
use crate::listener::{CleanupListener, CleanupListeners, ListenerId, RemovedImageStorage};
use crate::locks::RepositoryLocks;
use crate::metrics;
use crate::reachability::{Liveness, RepositorySnapshot, analyze};
use crate::reclaim::{delete_bytes, remove_catalog_rows};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tracing::instrument;
use wharf_core::timestamp;
use wharf_metadata::models::{ImageRow, RepositoryRow};
use wharf_metadata::{CatalogTransaction, MetadataStore};
use wharf_storage::DistributedStorage;

/// What a collect or purge pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub tags_pruned: u64,
    pub manifests_removed: u64,
    pub images_removed: u64,
    pub labels_removed: u64,
    pub storages_reclaimed: u64,
    pub bytes_reclaimed: u64,
    pub byte_delete_failures: u64,
}

impl CollectionReport {
    /// Whether a manifest, image, label or storage object was removed.
    /// Pruning expired tag history alone does not count.
    pub fn removed_anything(&self) -> bool {
        self.manifests_removed > 0
            || self.images_removed > 0
            || self.labels_removed > 0
            || self.storages_reclaimed > 0
    }
}

/// Catalog-side result of a pass, carried past commit.
#[derive(Default)]
pub(crate) struct Sweep {
    pub(crate) report: CollectionReport,
    pub(crate) reclaimed: Vec<Unowned>,
    pub(crate) removed_images: Vec<ImageRow>,
}

impl Sweep {
    fn wrote_nothing(&self) -> bool {
        self.report.tags_pruned == 0
            && self.report.manifests_removed == 0
            && self.report.images_removed == 0
            && self.reclaimed.is_empty()
    }
}

/// Garbage collector over one catalog and byte store.
pub struct GarbageCollector {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) storage: Arc<DistributedStorage>,
    pub(crate) locks: RepositoryLocks,
    listeners: CleanupListeners,
}

impl GarbageCollector {
    pub fn new(metadata: Arc<dyn MetadataStore>, storage: Arc<DistributedStorage>) -> Self {
        Self {
            metadata,
            storage,
            locks: RepositoryLocks::new(),
            listeners: CleanupListeners::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<DistributedStorage> {
        &self.storage
    }

    /// Register a listener for removed (image, storage object) pairs.
    pub fn register_listener(&self, listener: Arc<dyn CleanupListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Collect garbage in a repository now. Returns whether anything was removed.
    ///
    /// Tag rows past their retention window are pruned even when nothing else
    /// is dead, so a `false` result may still follow a committed write. The
    /// prune keeps the scanner from reporting the repository again.
    pub async fn collect(&self, repository_id: i64) -> GcResult<bool> {
        self.collect_at(repository_id, OffsetDateTime::now_utc()).await
    }

    /// Collect garbage as of `now`.
    pub async fn collect_at(&self, repository_id: i64, now: OffsetDateTime) -> GcResult<bool> {
        let report = self.collect_with_report(repository_id, now).await?;
        Ok(report.removed_anything())
    }

    /// Collect garbage as of `now` and report what was removed.
    ///
    /// A repository with nothing expired and nothing dead is left untouched:
    /// the transaction is rolled back.
    #[instrument(skip(self))]
    pub async fn collect_with_report(
        &self,
        repository_id: i64,
        now: OffsetDateTime,
    ) -> GcResult<CollectionReport> {
        let started = Instant::now();
        let now_ms = timestamp::to_millis(now);

        let guard = self.locks.lock(repository_id).await;
        let mut tx = self.metadata.begin_catalog_transaction().await?;

        let sweep = match self.collect_in(&mut *tx, repository_id, now_ms).await {
            Ok(sweep) => sweep,
            Err(e) => {
                rollback_quietly(tx, repository_id).await;
                return Err(e);
            }
        };

        if sweep.wrote_nothing() {
            tx.rollback().await?;
            tracing::debug!(repository_id, "Nothing to collect");
            return Ok(CollectionReport::default());
        }

        tx.commit().await?;
        drop(guard);

        let report = self.finish(sweep).await;
        if report.removed_anything() {
            metrics::REPOSITORIES_COLLECTED.inc();
        }
        metrics::PASS_DURATION.observe(started.elapsed().as_secs_f64());

        tracing::info!(
            repository_id,
            tags_pruned = report.tags_pruned,
            manifests_removed = report.manifests_removed,
            images_removed = report.images_removed,
            labels_removed = report.labels_removed,
            storages_reclaimed = report.storages_reclaimed,
            bytes_reclaimed = report.bytes_reclaimed,
            byte_delete_failures = report.byte_delete_failures,
            "Repository collected"
        );
        Ok(report)
    }

    /// Dereference and reclaim an explicit list of storage objects.
    ///
    /// Ids that no longer exist are skipped. Returns how many objects were
    /// reclaimed.
    pub async fn garbage_collect_storage(&self, storage_ids: &[i64]) -> GcResult<usize> {
        self.garbage_collect_storage_at(storage_ids, OffsetDateTime::now_utc())
            .await
    }

    #[instrument(skip(self, storage_ids), fields(candidates = storage_ids.len()))]
    pub async fn garbage_collect_storage_at(
        &self,
        storage_ids: &[i64],
        now: OffsetDateTime,
    ) -> GcResult<usize> {
        if storage_ids.is_empty() {
            return Ok(0);
        }
        let now_ms = timestamp::to_millis(now);

        let mut candidates = Candidates::new();
        candidates.extend("explicit", storage_ids.iter().copied());

        let mut tx = self.metadata.begin_catalog_transaction().await?;
        let reclaimed = match reclaim_unowned(&mut *tx, &candidates, now_ms).await {
            Ok(reclaimed) => reclaimed,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };

        if reclaimed.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }
        tx.commit().await?;

        let report = self
            .finish(Sweep {
                report: CollectionReport {
                    storages_reclaimed: reclaimed.len() as u64,
                    ..Default::default()
                },
                reclaimed,
                removed_images: Vec::new(),
            })
            .await;

        tracing::info!(
            storages_reclaimed = report.storages_reclaimed,
            bytes_reclaimed = report.bytes_reclaimed,
            "Storage objects collected"
        );
        Ok(report.storages_reclaimed as usize)
    }

    async fn collect_in(
        &self,
        tx: &mut dyn CatalogTransaction,
        repository_id: i64,
        now_ms: i64,
    ) -> GcResult<Sweep> {
        let repository = tx
            .repository(repository_id)
            .await?
            .ok_or(GcError::RepositoryNotFound(repository_id))?;
        self.sweep(tx, &repository, Liveness::At { now_ms }, now_ms, false)
            .await
    }

    /// Catalog half of a pass. Caller owns the repository lock and the transaction.
    pub(crate) async fn sweep(
        &self,
        tx: &mut dyn CatalogTransaction,
        repository: &RepositoryRow,
        liveness: Liveness,
        now_ms: i64,
        remove_repository: bool,
    ) -> GcResult<Sweep> {
        let repository_id = repository.repository_id;
        let snapshot = RepositorySnapshot {
            window: tx.retention_window(repository_id).await?,
            tags: tx.tags(repository_id).await?,
            manifest_ids: tx
                .manifests(repository_id)
                .await?
                .into_iter()
                .map(|m| m.manifest_id)
                .collect(),
            images: tx.images(repository_id).await?,
        };
        let reachability = analyze(&snapshot, liveness);

        let mut sweep = Sweep::default();
        sweep.report.tags_pruned = tx.delete_tags(&reachability.expired_tags).await?;

        if !reachability.has_dead_objects() && !remove_repository {
            return Ok(sweep);
        }

        let mut candidates = Candidates::new();

        let dead_manifests = &reachability.dead_manifests;
        if !dead_manifests.is_empty() {
            candidates.extend(
                "manifest_blob",
                tx.delete_manifest_blobs(dead_manifests).await?,
            );
            let label_ids = tx.delete_manifest_labels(dead_manifests).await?;
            sweep.report.manifests_removed = tx.delete_manifests(dead_manifests).await?;
            sweep.report.labels_removed = tx.delete_unreferenced_labels(&label_ids).await?;
        }

        let dead_images = &reachability.dead_images;
        if !dead_images.is_empty() {
            candidates.extend(
                "derived_storage",
                tx.delete_derived_storage(dead_images).await?,
            );
            let dead: HashSet<i64> = dead_images.iter().copied().collect();
            sweep.removed_images = snapshot
                .images
                .into_iter()
                .filter(|image| dead.contains(&image.image_id))
                .collect();
            candidates.extend("image", sweep.removed_images.iter().map(|i| i.storage_id));
            sweep.report.images_removed = tx.delete_images(dead_images).await?;
        }

        if remove_repository {
            candidates.extend(
                "uploaded_blob",
                tx.delete_uploaded_blobs(repository_id).await?,
            );
            tx.delete_repository(repository_id).await?;
        }

        let unowned = dereference(tx, &candidates, now_ms, MissingStorage::Fail).await?;
        sweep.reclaimed = remove_catalog_rows(tx, unowned).await?;
        sweep.report.storages_reclaimed = sweep.reclaimed.len() as u64;

        tracing::debug!(
            repository_id,
            candidates = candidates.len(),
            reclaimed = sweep.reclaimed.len(),
            "Dereferenced storage candidates"
        );
        Ok(sweep)
    }

    /// Post-commit half: delete bytes, notify listeners, count.
    pub(crate) async fn finish(&self, sweep: Sweep) -> CollectionReport {
        let Sweep {
            mut report,
            reclaimed,
            removed_images,
        } = sweep;

        let bytes = delete_bytes(&self.storage, &reclaimed).await;
        report.bytes_reclaimed = bytes.bytes_reclaimed;
        report.byte_delete_failures = bytes.failures;

        let digests: HashMap<i64, &str> = reclaimed
            .iter()
            .map(|u| (u.storage.storage_id, u.storage.content_checksum.as_str()))
            .collect();
        let events: Vec<RemovedImageStorage> = removed_images
            .iter()
            .filter_map(|image| {
                digests
                    .get(&image.storage_id)
                    .map(|digest| RemovedImageStorage::new(image, digest))
            })
            .collect();
        self.listeners.notify(&events);

        metrics::MANIFESTS_REMOVED.inc_by(report.manifests_removed);
        metrics::IMAGES_REMOVED.inc_by(report.images_removed);
        metrics::LABELS_REMOVED.inc_by(report.labels_removed);
        metrics::STORAGE_RECLAIMED.inc_by(report.storages_reclaimed);

        report
    }
}

pub(crate) async fn reclaim_unowned(
    tx: &mut dyn CatalogTransaction,
    candidates: &Candidates,
    now_ms: i64,
) -> GcResult<Vec<Unowned>> {
    let unowned = dereference(tx, candidates, now_ms, MissingStorage::Skip).await?;
    remove_catalog_rows(tx, unowned).await
}

pub(crate) async fn rollback_quietly(tx: Box<dyn CatalogTransaction>, repository_id: i64) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(repository_id, error = %e, "Rollback failed");
    }
}
