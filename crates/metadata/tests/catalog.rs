//! Catalog behaviour against a temporary SQLite database.

use wharf_core::{BlobDigest, RetentionWindow, TagStatus};
use wharf_metadata::models::{RepositoryState, TagTarget};
use wharf_metadata::{
    GcRepo, ImageRepo, ManifestRepo, MetadataError, NamespaceRepo, NewLabel, NewManifest, RepositoryRepo,
    SqliteStore, StorageRepo, TagRepo,
};

async fn open() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("catalog.db"), None)
        .await
        .unwrap();
    (dir, store)
}

async fn repo(store: &SqliteStore, window: u64) -> i64 {
    let ns = store
        .create_namespace("acme", RetentionWindow::from_secs(window))
        .await
        .unwrap();
    store
        .create_repository(ns.namespace_id, "app")
        .await
        .unwrap()
        .repository_id
}

async fn manifest(store: &SqliteStore, repository_id: i64, content: &str) -> i64 {
    let digest = BlobDigest::compute(content.as_bytes());
    let blob = store
        .store_blob_record(&digest, "local_us", content.len() as i64)
        .await
        .unwrap();
    store
        .create_manifest(&NewManifest {
            repository_id,
            digest: BlobDigest::compute(format!("manifest-{content}").as_bytes()).to_string(),
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            manifest_bytes: "{}".to_string(),
            blob_ids: vec![blob.storage_id],
            labels: vec![NewLabel::text("maintainer", content)],
        })
        .await
        .unwrap()
        .manifest_id
}

#[tokio::test]
async fn test_duplicate_namespace_rejected() {
    let (_dir, store) = open().await;
    store
        .create_namespace("acme", RetentionWindow::ZERO)
        .await
        .unwrap();

    let err = store
        .create_namespace("acme", RetentionWindow::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_retarget_ends_previous_row() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 60).await;
    let first = manifest(&store, repository_id, "one").await;
    let second = manifest(&store, repository_id, "two").await;

    store
        .retarget_tag(repository_id, "latest", TagTarget::Manifest(first), 1_000, None)
        .await
        .unwrap();
    let current = store
        .retarget_tag(repository_id, "latest", TagTarget::Manifest(second), 2_000, None)
        .await
        .unwrap();

    let rows = store.list_tags(repository_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].lifetime_end_ms, Some(2_000));
    assert_eq!(rows[1].tag_id, current.tag_id);
    assert_eq!(rows[1].lifetime_end_ms, None);

    let window = RetentionWindow::from_secs(60);
    assert_eq!(rows[0].status(2_500, window), TagStatus::Ended);
    assert_eq!(rows[0].status(62_000, window), TagStatus::Expired);

    let active = store
        .get_active_tag(repository_id, "latest", 3_000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.target(), Some(TagTarget::Manifest(second)));
}

#[tokio::test]
async fn test_delete_tag() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;
    let m = manifest(&store, repository_id, "one").await;

    store
        .retarget_tag(repository_id, "v1", TagTarget::Manifest(m), 1_000, None)
        .await
        .unwrap();

    let ended = store.delete_tag(repository_id, "v1", 5_000).await.unwrap().unwrap();
    assert_eq!(ended.lifetime_end_ms, Some(5_000));
    assert!(store.get_active_tag(repository_id, "v1", 5_000).await.unwrap().is_none());
    assert!(store.delete_tag(repository_id, "v1", 6_000).await.unwrap().is_none());
}

#[tokio::test]
async fn test_temporary_tag_active_until_scheduled_end() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;
    let m = manifest(&store, repository_id, "one").await;

    store
        .retarget_tag(repository_id, "$temp", TagTarget::Manifest(m), 1_000, Some(10_000))
        .await
        .unwrap();

    assert!(store.get_active_tag(repository_id, "$temp", 9_999).await.unwrap().is_some());
    assert!(store.get_active_tag(repository_id, "$temp", 10_000).await.unwrap().is_none());
}

#[tokio::test]
async fn test_blob_record_dedupes_by_digest() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;
    let digest = BlobDigest::compute(b"layer");

    let a = store.store_blob_record(&digest, "local_us", 5).await.unwrap();
    let b = store
        .store_blob_record_and_temp_link(repository_id, &digest, "local_eu", 5, 99_000)
        .await
        .unwrap();

    assert_eq!(a.storage_id, b.storage_id);
    assert_eq!(a.content_checksum, digest.to_string());
    assert_eq!(
        store.storage_locations(a.storage_id).await.unwrap(),
        vec!["local_eu".to_string(), "local_us".to_string()]
    );

    let links = store.list_uploaded_blobs(repository_id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].expires_at_ms, 99_000);
}

#[tokio::test]
async fn test_create_manifest_is_idempotent() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;

    let first = manifest(&store, repository_id, "one").await;
    let again = manifest(&store, repository_id, "one").await;
    assert_eq!(first, again);

    let blobs = store.manifest_blobs(first).await.unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(store.list_manifests(repository_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_find_repository_with_garbage_threshold() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 10).await;
    let m = manifest(&store, repository_id, "one").await;

    store
        .retarget_tag(repository_id, "v1", TagTarget::Manifest(m), 1_000, None)
        .await
        .unwrap();
    assert!(store.find_repository_with_garbage(100_000, 0, None, &[]).await.unwrap().is_none());

    store.delete_tag(repository_id, "v1", 2_000).await.unwrap();

    // Ended at 2s with a 10s window: past the grace period from 12s on.
    assert!(store.find_repository_with_garbage(11_999, 0, None, &[]).await.unwrap().is_none());
    let found = store.find_repository_with_garbage(12_000, 0, None, &[]).await.unwrap().unwrap();
    assert_eq!(found.repository_id, repository_id);

    // A threshold pushes the cutoff further back.
    assert!(store.find_repository_with_garbage(12_000, 1_000, None, &[]).await.unwrap().is_none());
    assert!(store.find_repository_with_garbage(13_000, 1_000, None, &[]).await.unwrap().is_some());

    // Restricting to another policy hides it.
    let other = Some(RetentionWindow::from_secs(60));
    assert!(store.find_repository_with_garbage(100_000, 0, other, &[]).await.unwrap().is_none());
    let own = Some(RetentionWindow::from_secs(10));
    assert!(store.find_repository_with_garbage(100_000, 0, own, &[]).await.unwrap().is_some());

    // Excluded repositories are never picked.
    assert!(
        store
            .find_repository_with_garbage(100_000, 0, None, &[repository_id])
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_retention_windows_and_state() {
    let (_dir, store) = open().await;
    let a = store.create_namespace("a", RetentionWindow::from_secs(30)).await.unwrap();
    store.create_namespace("b", RetentionWindow::ZERO).await.unwrap();
    store.create_namespace("c", RetentionWindow::from_secs(30)).await.unwrap();

    let windows = store.list_retention_windows().await.unwrap();
    assert_eq!(windows, vec![RetentionWindow::ZERO, RetentionWindow::from_secs(30)]);

    store
        .set_removed_tag_expiration(a.namespace_id, RetentionWindow::from_secs(5))
        .await
        .unwrap();
    let reloaded = store.get_namespace_by_name("a").await.unwrap().unwrap();
    assert_eq!(reloaded.retention_window(), RetentionWindow::from_secs(5));

    assert!(matches!(
        store
            .set_removed_tag_expiration(9_999, RetentionWindow::ZERO)
            .await,
        Err(MetadataError::NotFound(_))
    ));

    let repository = store.create_repository(a.namespace_id, "app").await.unwrap();
    store
        .set_repository_state(repository.repository_id, RepositoryState::MarkedForDeletion)
        .await
        .unwrap();
    let repository = store
        .get_repository_by_name("a", "app")
        .await
        .unwrap()
        .unwrap();
    assert!(repository.is_marked_for_deletion());
}

#[tokio::test]
async fn test_owner_count_and_rollback() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;
    let m = manifest(&store, repository_id, "one").await;
    let storage_id = store.manifest_blobs(m).await.unwrap()[0].storage_id;

    let mut tx = store.begin_catalog_transaction().await.unwrap();
    assert_eq!(tx.storage_owner_count(storage_id, 0).await.unwrap(), 1);
    assert_eq!(tx.delete_manifest_blobs(&[m]).await.unwrap(), vec![storage_id]);
    assert_eq!(tx.storage_owner_count(storage_id, 0).await.unwrap(), 0);
    tx.rollback().await.unwrap();

    assert_eq!(store.manifest_blobs(m).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_upload_links() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;
    let early = store
        .store_blob_record_and_temp_link(repository_id, &BlobDigest::compute(b"a"), "local_us", 1, 1_000)
        .await
        .unwrap();
    store
        .store_blob_record_and_temp_link(repository_id, &BlobDigest::compute(b"b"), "local_us", 1, 5_000)
        .await
        .unwrap();

    let mut tx = store.begin_catalog_transaction().await.unwrap();
    assert_eq!(tx.storage_owner_count(early.storage_id, 999).await.unwrap(), 1);
    assert_eq!(tx.storage_owner_count(early.storage_id, 1_000).await.unwrap(), 0);
    tx.rollback().await.unwrap();

    // Rolled back, the expired link is still there.
    let mut tx = store.begin_catalog_transaction().await.unwrap();
    let reaped = tx.delete_expired_uploaded_blobs(2_000, 100).await.unwrap();
    assert_eq!(reaped, vec![early.storage_id]);
    tx.rollback().await.unwrap();
    assert_eq!(store.list_uploaded_blobs(repository_id).await.unwrap().len(), 2);

    let mut tx = store.begin_catalog_transaction().await.unwrap();
    let reaped = tx.delete_expired_uploaded_blobs(2_000, 100).await.unwrap();
    assert_eq!(reaped, vec![early.storage_id]);
    tx.commit().await.unwrap();
    assert_eq!(store.list_uploaded_blobs(repository_id).await.unwrap().len(), 1);

    let stats = store.garbage_stats().await.unwrap();
    assert_eq!(stats.dangling_storages, 1);
}

#[tokio::test]
async fn test_image_with_missing_storage_rejected() {
    let (_dir, store) = open().await;
    let repository_id = repo(&store, 0).await;

    let err = store
        .create_image(repository_id, "orphan", 4242, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::Constraint(_)));
}
