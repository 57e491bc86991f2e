//! Reaping of expired uploaded-blob links.

use crate::collector::{CollectionReport, GarbageCollector, Sweep, reclaim_unowned};
use crate::dereference::{Candidates, Unowned};
use crate::error::GcResult;
use serde::Serialize;
use time::OffsetDateTime;
use wharf_core::timestamp;
use wharf_metadata::CatalogTransaction;

/// What one reap removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadReap {
    /// Distinct storage objects whose expired links were removed.
    pub storages_unlinked: usize,
    /// Of those, objects nothing else owned.
    pub storages_reclaimed: usize,
}

impl GarbageCollector {
    /// Remove up to `batch` expired upload links and collect the storage
    /// objects they were protecting.
    ///
    /// The link delete, the owner recount and the storage row delete share
    /// one transaction, so an object never loses its last link without
    /// being reclaimed in the same commit.
    pub async fn reap_expired_uploaded_blobs(
        &self,
        now: OffsetDateTime,
        batch: u32,
    ) -> GcResult<UploadReap> {
        let now_ms = timestamp::to_millis(now);

        let mut tx = self.metadata.begin_catalog_transaction().await?;
        let (unlinked, reclaimed) = match reap_in(&mut *tx, now_ms, batch).await {
            Ok(reaped) => reaped,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };

        if unlinked == 0 {
            tx.rollback().await?;
            return Ok(UploadReap::default());
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

        tracing::debug!(
            unlinked,
            reclaimed = report.storages_reclaimed,
            bytes_reclaimed = report.bytes_reclaimed,
            "Reaped expired upload links"
        );
        Ok(UploadReap {
            storages_unlinked: unlinked,
            storages_reclaimed: report.storages_reclaimed as usize,
        })
    }
}

async fn reap_in(
    tx: &mut dyn CatalogTransaction,
    now_ms: i64,
    batch: u32,
) -> GcResult<(usize, Vec<Unowned>)> {
    let storage_ids = tx.delete_expired_uploaded_blobs(now_ms, batch).await?;
    if storage_ids.is_empty() {
        return Ok((0, Vec::new()));
    }

    let mut candidates = Candidates::new();
    candidates.extend("uploaded_blob", storage_ids.iter().copied());
    let reclaimed = reclaim_unowned(tx, &candidates, now_ms).await?;
    Ok((storage_ids.len(), reclaimed))
}
