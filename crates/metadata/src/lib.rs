//! Catalog store for wharf.
//!
//! This crate provides the relations garbage collection reasons about:
//! - Namespaces (with the removed-tag retention window) and repositories
//! - Tag history rows, manifests, manifest blobs and labels
//! - Legacy image trees and storage derived from images
//! - Content-addressed storage objects, their placements and upload links
//!
//! GC runs inside a [`CatalogTransaction`] opened through [`GcRepo`].

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{
    CatalogTransaction, GcRepo, ImageRepo, LabelRepo, ManifestRepo, NamespaceRepo, NewLabel,
    NewManifest, RepositoryRepo, StorageRepo, TagRepo,
};
pub use store::{MetadataStore, SqliteCatalogTransaction, SqliteStore};

use std::sync::Arc;
use wharf_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("catalog.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
