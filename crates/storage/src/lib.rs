//! Byte store abstraction and backends for wharf.
//!
//! This crate provides:
//! - The per-location `ObjectStore` trait
//! - A local filesystem backend
//! - `DistributedStorage`, the location-set addressed store blobs live in

pub mod backends;
pub mod distributed;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use distributed::DistributedStorage;
pub use error::{StorageError, StorageResult};
pub use traits::ObjectStore;

use std::sync::Arc;
use wharf_core::config::{BackendConfig, StorageConfig};

/// Create the byte store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<DistributedStorage>> {
    config.validate().map_err(StorageError::Config)?;

    let mut storage = DistributedStorage::new(config.preferred_locations.clone());
    for (name, backend) in &config.locations {
        let store: Arc<dyn ObjectStore> = match backend {
            BackendConfig::Filesystem { path } => Arc::new(FilesystemBackend::new(path).await?),
        };
        tracing::debug!(location = %name, backend = store.backend_name(), "Storage location configured");
        storage = storage.with_location(name.clone(), store);
    }
    Ok(Arc::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let mut locations = BTreeMap::new();
        locations.insert(
            "local_us".to_string(),
            BackendConfig::Filesystem {
                path: temp.path().join("store"),
            },
        );
        let config = StorageConfig {
            preferred_locations: vec!["local_us".to_string()],
            locations,
        };

        let storage = from_config(&config).await.unwrap();
        storage
            .put(storage.preferred_locations(), "hello.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert!(storage.exists(&["local_us"], "hello.txt").await.unwrap());
    }

    #[tokio::test]
    async fn from_config_rejects_unknown_preferred() {
        let config = StorageConfig {
            preferred_locations: vec!["nowhere".to_string()],
            locations: BTreeMap::new(),
        };

        match from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
