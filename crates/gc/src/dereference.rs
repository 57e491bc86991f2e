//! Blob dereferencing: decide which candidate storage objects lost their
//! last owner.
//!
//! Runs inside the transaction that deleted the owner rows, so the recount
//! and the later catalog delete are atomic with respect to those deletions.

use crate::error::{GcError, GcResult};
use std::collections::BTreeMap;
use wharf_metadata::CatalogTransaction;
use wharf_metadata::models::StorageRow;

/// Candidate storage ids, each tagged with the owner kind that released it.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    owners: BTreeMap<i64, &'static str>,
}

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add ids released by owner rows of kind `owner`. The first kind recorded wins.
    pub fn extend(&mut self, owner: &'static str, storage_ids: impl IntoIterator<Item = i64>) {
        for id in storage_ids {
            self.owners.entry(id).or_insert(owner);
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// What to do when a candidate's storage row does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingStorage {
    /// The id came from an owner row: the catalog is corrupt.
    Fail,
    /// The id came from a caller-supplied list; skip it.
    Skip,
}

/// A storage object with zero owners and the locations holding its bytes.
#[derive(Debug, Clone)]
pub struct Unowned {
    pub storage: StorageRow,
    pub locations: Vec<String>,
}

/// Recount owners of every candidate and return those with none left.
///
/// A candidate still owned (including by an unexpired upload link created
/// concurrently) is dropped silently.
pub async fn dereference(
    tx: &mut dyn CatalogTransaction,
    candidates: &Candidates,
    now_ms: i64,
    missing: MissingStorage,
) -> GcResult<Vec<Unowned>> {
    let mut unowned = Vec::new();

    for (&storage_id, &owner) in &candidates.owners {
        let Some(storage) = tx.get_storage(storage_id).await? else {
            match missing {
                MissingStorage::Fail => {
                    return Err(GcError::InconsistentReference { owner, storage_id });
                }
                MissingStorage::Skip => {
                    tracing::debug!(storage_id, "Candidate storage object already gone");
                    continue;
                }
            }
        };

        let owners = tx.storage_owner_count(storage_id, now_ms).await?;
        if owners > 0 {
            tracing::debug!(
                storage_id,
                digest = %storage.content_checksum,
                owners,
                "Storage object still referenced, keeping"
            );
            continue;
        }

        let locations = tx.storage_locations(storage_id).await?;
        unowned.push(Unowned { storage, locations });
    }

    Ok(unowned)
}
