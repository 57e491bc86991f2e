//! Location-addressed byte store.
//!
//! A blob may be placed in several named locations. Writers pass the set of
//! locations they may use, readers the set the catalog recorded for the blob,
//! and deletions always name one concrete location.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use wharf_core::BlobDigest;

/// Byte store spanning every configured location.
#[derive(Clone)]
pub struct DistributedStorage {
    locations: BTreeMap<String, Arc<dyn ObjectStore>>,
    preferred: Vec<String>,
}

impl DistributedStorage {
    /// Create an empty store with the given preferred locations.
    pub fn new(preferred: Vec<String>) -> Self {
        Self {
            locations: BTreeMap::new(),
            preferred,
        }
    }

    /// Register the backend serving a location.
    pub fn with_location(mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.locations.insert(name.into(), store);
        self
    }

    /// Locations new content should be written to, most preferred first.
    pub fn preferred_locations(&self) -> &[String] {
        &self.preferred
    }

    /// Names of every configured location.
    pub fn location_names(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }

    /// Backend for a single location.
    pub fn location(&self, name: &str) -> StorageResult<&Arc<dyn ObjectStore>> {
        self.locations
            .get(name)
            .ok_or_else(|| StorageError::UnknownLocation(name.to_string()))
    }

    /// Byte-store path of a blob.
    pub fn blob_path(digest: &BlobDigest) -> String {
        digest.blob_path()
    }

    /// Write content to the first configured location of `locations`.
    ///
    /// Returns the name of the location written.
    #[instrument(skip(self, locations, data), fields(size = data.len()))]
    pub async fn put<S: AsRef<str>>(
        &self,
        locations: &[S],
        path: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        let name = locations
            .iter()
            .map(AsRef::as_ref)
            .find(|name| self.locations.contains_key(*name))
            .ok_or_else(|| StorageError::NoLocation(path.to_string()))?;
        self.location(name)?.put(path, data).await?;
        Ok(name.to_string())
    }

    /// Read content from the first location in `locations` that holds it.
    #[instrument(skip(self, locations))]
    pub async fn get<S: AsRef<str>>(&self, locations: &[S], path: &str) -> StorageResult<Bytes> {
        for name in locations.iter().map(AsRef::as_ref) {
            let Some(store) = self.locations.get(name) else {
                continue;
            };
            match store.get(path).await {
                Ok(data) => return Ok(data),
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::NotFound(path.to_string()))
    }

    /// Whether any of `locations` holds `path`.
    #[instrument(skip(self, locations))]
    pub async fn exists<S: AsRef<str>>(&self, locations: &[S], path: &str) -> StorageResult<bool> {
        for name in locations.iter().map(AsRef::as_ref) {
            if let Some(store) = self.locations.get(name)
                && store.exists(path).await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Delete `path` from a single location.
    #[instrument(skip(self))]
    pub async fn delete(&self, location: &str, path: &str) -> StorageResult<()> {
        self.location(location)?.delete(path).await
    }

    /// Check every configured location.
    pub async fn health_check(&self) -> StorageResult<()> {
        for (name, store) in &self.locations {
            store.health_check().await.map_err(|e| {
                StorageError::Config(format!("location '{name}' failed health check: {e}"))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::filesystem::FilesystemBackend;

    async fn two_locations(dir: &std::path::Path) -> DistributedStorage {
        let east = FilesystemBackend::new(dir.join("east")).await.unwrap();
        let west = FilesystemBackend::new(dir.join("west")).await.unwrap();
        DistributedStorage::new(vec!["east".to_string()])
            .with_location("east", Arc::new(east))
            .with_location("west", Arc::new(west))
    }

    #[tokio::test]
    async fn test_put_uses_first_known_location() {
        let dir = tempfile::tempdir().unwrap();
        let storage = two_locations(dir.path()).await;

        let written = storage
            .put(&["missing", "west"], "sha256/aa/aa", Bytes::from("x"))
            .await
            .unwrap();
        assert_eq!(written, "west");
        assert!(storage.exists(&["west"], "sha256/aa/aa").await.unwrap());
        assert!(!storage.exists(&["east"], "sha256/aa/aa").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_searches_locations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = two_locations(dir.path()).await;

        storage
            .put(&["west"], "blob", Bytes::from("payload"))
            .await
            .unwrap();
        let data = storage.get(&["east", "west"], "blob").await.unwrap();
        assert_eq!(data, Bytes::from("payload"));

        storage.delete("west", "blob").await.unwrap();
        assert!(matches!(
            storage.get(&["east", "west"], "blob").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_location() {
        let dir = tempfile::tempdir().unwrap();
        let storage = two_locations(dir.path()).await;

        assert!(matches!(
            storage.delete("north", "blob").await,
            Err(StorageError::UnknownLocation(_))
        ));
        assert!(matches!(
            storage.put(&["north"], "blob", Bytes::new()).await,
            Err(StorageError::NoLocation(_))
        ));
    }
}
