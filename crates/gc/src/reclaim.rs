//! Physical reclamation of unowned storage objects.
//!
//! The catalog row goes first, inside the GC transaction. Bytes are deleted
//! only after that transaction commits; a failed byte delete leaves an
//! orphaned object that nothing references, never a row pointing at missing
//! bytes.

use crate::dereference::Unowned;
use crate::error::GcResult;
use crate::metrics;
use wharf_core::BlobDigest;
use wharf_metadata::CatalogTransaction;
use wharf_storage::{DistributedStorage, StorageError};

/// Delete catalog rows of unowned objects. Returns the objects whose row
/// this transaction actually removed.
pub async fn remove_catalog_rows(
    tx: &mut dyn CatalogTransaction,
    unowned: Vec<Unowned>,
) -> GcResult<Vec<Unowned>> {
    let mut removed = Vec::with_capacity(unowned.len());
    for object in unowned {
        if tx.delete_storage(object.storage.storage_id).await? {
            removed.push(object);
        } else {
            tracing::debug!(
                storage_id = object.storage.storage_id,
                "Storage row already removed, skipping byte delete"
            );
        }
    }
    Ok(removed)
}

/// Result of deleting bytes for reclaimed objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteDeletion {
    /// Bytes of objects removed from every location.
    pub bytes_reclaimed: u64,
    /// Location deletes that failed.
    pub failures: u64,
}

/// Delete the bytes of objects whose catalog rows are gone. Never fails:
/// errors are logged and counted.
pub async fn delete_bytes(storage: &DistributedStorage, removed: &[Unowned]) -> ByteDeletion {
    let mut outcome = ByteDeletion::default();

    for object in removed {
        let storage_id = object.storage.storage_id;
        let digest = &object.storage.content_checksum;

        let path = match BlobDigest::parse(digest) {
            Ok(parsed) => DistributedStorage::blob_path(&parsed),
            Err(e) => {
                tracing::warn!(storage_id, digest = %digest, error = %e, "Unparseable digest, bytes left in place");
                outcome.failures += 1;
                continue;
            }
        };

        let mut clean = true;
        for location in &object.locations {
            match storage.delete(location, &path).await {
                Ok(()) => {
                    tracing::debug!(storage_id, digest = %digest, location = %location, "Deleted storage bytes");
                }
                Err(StorageError::NotFound(_)) => {
                    tracing::trace!(storage_id, location = %location, "Storage bytes already gone");
                }
                Err(e) => {
                    clean = false;
                    outcome.failures += 1;
                    tracing::warn!(
                        storage_id,
                        digest = %digest,
                        location = %location,
                        error = %e,
                        "Failed to delete storage bytes; object is orphaned"
                    );
                }
            }
        }

        if clean {
            outcome.bytes_reclaimed += object.storage.image_size.max(0) as u64;
        }
    }

    metrics::BYTES_RECLAIMED.inc_by(outcome.bytes_reclaimed);
    metrics::BYTE_DELETE_FAILURES.inc_by(outcome.failures);
    outcome
}
