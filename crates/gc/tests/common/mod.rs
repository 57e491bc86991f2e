//! Shared fixtures for GC integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};
use wharf_core::{BlobDigest, RetentionWindow, timestamp};
use wharf_gc::{CleanupListener, GarbageCollector, RemovedImageStorage};
use wharf_metadata::models::{GarbageStats, ImageRow, ManifestRow, StorageRow, TagRow, TagTarget};
use wharf_metadata::{
    GcRepo, ImageRepo, ManifestRepo, MetadataStore, NamespaceRepo, NewLabel, NewManifest,
    RepositoryRepo, SqliteStore, StorageRepo, TagRepo,
};
use wharf_storage::backends::filesystem::FilesystemBackend;
use wharf_storage::{DistributedStorage, ObjectStore, StorageError, StorageResult};

pub const LOCATION: &str = "local_us";

/// Config blob content shared by every test manifest.
pub const SHARED_CONFIG: &[u8] = br#"{"config":{},"rootfs":{"type":"layers","diff_ids":[]},"history":[]}"#;

/// Layer content added by `include_shared_blob`.
pub const SHARED_LAYER: &[u8] = b"some data here";

pub struct TestEnv {
    pub dir: TempDir,
    pub metadata: Arc<SqliteStore>,
    pub storage: Arc<DistributedStorage>,
    pub gc: GarbageCollector,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("blobs")).await.unwrap();
        Self::with_backend(dir, Arc::new(backend)).await
    }

    /// Environment whose single location is served by `backend`.
    pub async fn with_backend(dir: TempDir, backend: Arc<dyn ObjectStore>) -> Self {
        let metadata = Arc::new(
            SqliteStore::new(dir.path().join("catalog.db"), None)
                .await
                .unwrap(),
        );
        let storage = Arc::new(
            DistributedStorage::new(vec![LOCATION.to_string()]).with_location(LOCATION, backend),
        );
        let gc = GarbageCollector::new(
            metadata.clone() as Arc<dyn MetadataStore>,
            storage.clone(),
        );
        Self {
            dir,
            metadata,
            storage,
            gc,
        }
    }

    /// Create (or reuse) `namespace` with the given window and a repository in it.
    pub async fn create_repository(&self, namespace: &str, name: &str, window_secs: u64) -> i64 {
        let ns = match self.metadata.get_namespace_by_name(namespace).await.unwrap() {
            Some(ns) => ns,
            None => self
                .metadata
                .create_namespace(namespace, RetentionWindow::from_secs(window_secs))
                .await
                .unwrap(),
        };
        self.metadata
            .create_repository(ns.namespace_id, name)
            .await
            .unwrap()
            .repository_id
    }

    async fn write_bytes(&self, content: &[u8]) -> BlobDigest {
        let digest = BlobDigest::compute(content);
        self.storage
            .put(
                &[LOCATION],
                &DistributedStorage::blob_path(&digest),
                Bytes::copy_from_slice(content),
            )
            .await
            .unwrap();
        digest
    }

    /// Write bytes and record the storage object without any owner.
    pub async fn store_blob(&self, content: &[u8]) -> StorageRow {
        let digest = self.write_bytes(content).await;
        self.metadata
            .store_blob_record(&digest, LOCATION, content.len() as i64)
            .await
            .unwrap()
    }

    /// Write bytes and record the storage object with an upload link
    /// expiring `link_secs` after `now`.
    pub async fn populate_blob(
        &self,
        repository_id: i64,
        content: &[u8],
        now: OffsetDateTime,
        link_secs: i64,
    ) -> StorageRow {
        let digest = self.write_bytes(content).await;
        self.metadata
            .store_blob_record_and_temp_link(
                repository_id,
                &digest,
                LOCATION,
                content.len() as i64,
                timestamp::to_millis(now + Duration::seconds(link_secs)),
            )
            .await
            .unwrap()
    }

    /// A manifest with the shared config blob, one layer unique to
    /// `differentiation` and optionally the shared layer.
    pub async fn create_manifest_for_testing(
        &self,
        repository_id: i64,
        differentiation: &str,
        include_shared_blob: bool,
    ) -> ManifestRow {
        let config = self.store_blob(SHARED_CONFIG).await;
        let unique = self
            .store_blob(format!("layer for {differentiation}").as_bytes())
            .await;

        let mut blob_ids = vec![config.storage_id, unique.storage_id];
        let mut layers = vec![unique.content_checksum.clone()];
        if include_shared_blob {
            let shared = self.store_blob(SHARED_LAYER).await;
            blob_ids.push(shared.storage_id);
            layers.push(shared.content_checksum.clone());
        }

        let body = serde_json::json!({
            "schemaVersion": 2,
            "config": config.content_checksum,
            "layers": layers,
        })
        .to_string();

        self.metadata
            .create_manifest(&NewManifest {
                repository_id,
                digest: BlobDigest::compute(body.as_bytes()).to_string(),
                media_type: "application/vnd.docker.distribution.manifest.v2+json".to_string(),
                manifest_bytes: body,
                blob_ids,
                labels: vec![NewLabel::text("differentiation", differentiation)],
            })
            .await
            .unwrap()
    }

    pub async fn tag_manifest(
        &self,
        repository_id: i64,
        name: &str,
        manifest_id: i64,
        at: OffsetDateTime,
    ) -> TagRow {
        self.metadata
            .retarget_tag(
                repository_id,
                name,
                TagTarget::Manifest(manifest_id),
                timestamp::to_millis(at),
                None,
            )
            .await
            .unwrap()
    }

    pub async fn delete_tag(&self, repository_id: i64, name: &str, at: OffsetDateTime) {
        self.metadata
            .delete_tag(repository_id, name, timestamp::to_millis(at))
            .await
            .unwrap()
            .expect("tag was active");
    }

    /// Legacy image chain, base first. Returns the images in creation order.
    pub async fn create_image_chain(
        &self,
        repository_id: i64,
        prefix: &str,
        contents: &[&[u8]],
    ) -> Vec<ImageRow> {
        let mut images: Vec<ImageRow> = Vec::new();
        for (i, content) in contents.iter().enumerate() {
            let storage = self.store_blob(content).await;
            let parent = images.last().map(|p| p.image_id);
            let image = self
                .metadata
                .create_image(
                    repository_id,
                    &format!("{prefix}{i}"),
                    storage.storage_id,
                    parent,
                )
                .await
                .unwrap();
            images.push(image);
        }
        images
    }

    pub async fn blobs_of(&self, manifest_id: i64) -> Vec<StorageRow> {
        self.metadata.manifest_blobs(manifest_id).await.unwrap()
    }

    /// Whether the byte store still serves the object's content.
    pub async fn fetchable(&self, storage: &StorageRow) -> bool {
        let digest = BlobDigest::parse(&storage.content_checksum).unwrap();
        self.storage
            .exists(&[LOCATION], &DistributedStorage::blob_path(&digest))
            .await
            .unwrap()
    }

    /// Whether the catalog row of the object still exists.
    pub async fn storage_row_exists(&self, storage: &StorageRow) -> bool {
        self.metadata
            .get_storage(storage.storage_id)
            .await
            .unwrap()
            .is_some()
    }

    pub async fn manifest_exists(&self, manifest_id: i64) -> bool {
        self.metadata
            .get_manifest(manifest_id)
            .await
            .unwrap()
            .is_some()
    }

    /// Delete the catalog row of a storage object that owner rows still
    /// reference, with foreign keys switched off for the delete.
    pub async fn corrupt_storage_row(&self, storage: &StorageRow) {
        let pool = self.metadata.pool();
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM image_storage_placements WHERE storage_id = ?")
            .bind(storage.storage_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM image_storage WHERE storage_id = ?")
            .bind(storage.storage_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(pool)
            .await
            .unwrap();
    }

    pub async fn dangling(&self) -> GarbageStats {
        self.metadata.garbage_stats().await.unwrap()
    }
}

/// Listener recording every (image, storage) notification.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<RemovedImageStorage>>,
}

impl RecordingListener {
    pub fn image_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.image_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl CleanupListener for RecordingListener {
    fn on_image_storage_removed(&self, removed: &RemovedImageStorage) {
        self.events.lock().unwrap().push(removed.clone());
    }
}

/// Filesystem store whose deletes always fail.
pub struct FailingDeleteStore {
    pub inner: FilesystemBackend,
}

#[async_trait]
impl ObjectStore for FailingDeleteStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::other("byte store unavailable")))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
