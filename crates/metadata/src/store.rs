//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult, map_constraint_violation};
use crate::repos::{
    CatalogTransaction, GcRepo, ImageRepo, LabelRepo, ManifestRepo, NamespaceRepo,
    RepositoryRepo, StorageRepo, TagRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    NamespaceRepo
    + RepositoryRepo
    + TagRepo
    + ManifestRepo
    + LabelRepo
    + ImageRepo
    + StorageRepo
    + GcRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// `query_timeout_secs` bounds how long a caller waits for the single
    /// pooled connection.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a GC
        // transaction must not interleave with another writer.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), query_timeout_secs, "opened sqlite catalog");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const NAMESPACE_COLUMNS: &str = "namespace_id, name, removed_tag_expiration_s, created_at";
const REPOSITORY_COLUMNS: &str = "repository_id, namespace_id, name, state, created_at";
const TAG_COLUMNS: &str =
    "tag_id, repository_id, name, manifest_id, image_id, lifetime_start_ms, lifetime_end_ms";
const MANIFEST_COLUMNS: &str =
    "manifest_id, repository_id, digest, media_type, manifest_bytes, created_at";
const STORAGE_COLUMNS: &str = "storage_id, uuid, content_checksum, image_size, created_at";
const IMAGE_COLUMNS: &str =
    "image_id, repository_id, docker_image_id, storage_id, parent_id, created_at";
const LABEL_COLUMNS: &str = "label_id, key, value, media_type";
const DERIVED_COLUMNS: &str = "derived_id, source_image_id, derivative_id, transformation";
const UPLOADED_BLOB_COLUMNS: &str =
    "uploaded_blob_id, repository_id, blob_id, expires_at_ms, created_at";

/// Tag rows active at the bound `now_ms`.
const ACTIVE_TAG_PREDICATE: &str = "(lifetime_end_ms IS NULL OR lifetime_end_ms > ?)";

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{NewLabel, NewManifest};
    use std::collections::BTreeSet;
    use time::OffsetDateTime;
    use uuid::Uuid;
    use wharf_core::{BlobDigest, RetentionWindow};

    fn window_secs(window: RetentionWindow) -> i64 {
        i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
    }

    async fn ensure_location_in(conn: &mut SqliteConnection, name: &str) -> MetadataResult<i64> {
        sqlx::query("INSERT INTO image_storage_locations (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&mut *conn)
            .await?;
        let id: i64 =
            sqlx::query_scalar("SELECT location_id FROM image_storage_locations WHERE name = ?")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;
        Ok(id)
    }

    async fn store_blob_in(
        conn: &mut SqliteConnection,
        digest: &BlobDigest,
        location: &str,
        size: i64,
    ) -> MetadataResult<StorageRow> {
        let location_id = ensure_location_in(conn, location).await?;
        let checksum = digest.to_string();

        let existing = sqlx::query_as::<_, StorageRow>(&format!(
            "SELECT {STORAGE_COLUMNS} FROM image_storage WHERE content_checksum = ?"
        ))
        .bind(&checksum)
        .fetch_optional(&mut *conn)
        .await?;

        let storage = match existing {
            Some(storage) => storage,
            None => {
                sqlx::query_as::<_, StorageRow>(&format!(
                    "INSERT INTO image_storage (uuid, content_checksum, image_size, created_at) \
                     VALUES (?, ?, ?, ?) RETURNING {STORAGE_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(&checksum)
                .bind(size)
                .bind(OffsetDateTime::now_utc())
                .fetch_one(&mut *conn)
                .await?
            }
        };

        sqlx::query(
            "INSERT OR IGNORE INTO image_storage_placements (storage_id, location_id) VALUES (?, ?)",
        )
        .bind(storage.storage_id)
        .bind(location_id)
        .execute(&mut *conn)
        .await?;

        Ok(storage)
    }

    async fn storage_locations_in(
        conn: &mut SqliteConnection,
        storage_id: i64,
    ) -> MetadataResult<Vec<String>> {
        let names = sqlx::query_scalar(
            r#"
            SELECT l.name FROM image_storage_placements p
            INNER JOIN image_storage_locations l ON l.location_id = p.location_id
            WHERE p.storage_id = ?
            ORDER BY l.name
            "#,
        )
        .bind(storage_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(names)
    }

    #[async_trait]
    impl NamespaceRepo for SqliteStore {
        async fn create_namespace(
            &self,
            name: &str,
            window: RetentionWindow,
        ) -> MetadataResult<NamespaceRow> {
            sqlx::query_as::<_, NamespaceRow>(&format!(
                "INSERT INTO namespaces (name, removed_tag_expiration_s, created_at) \
                 VALUES (?, ?, ?) RETURNING {NAMESPACE_COLUMNS}"
            ))
            .bind(name)
            .bind(window_secs(window))
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint_violation(e, || format!("namespace {name}")))
        }

        async fn get_namespace(&self, namespace_id: i64) -> MetadataResult<Option<NamespaceRow>> {
            let row = sqlx::query_as::<_, NamespaceRow>(&format!(
                "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE namespace_id = ?"
            ))
            .bind(namespace_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_namespace_by_name(&self, name: &str) -> MetadataResult<Option<NamespaceRow>> {
            let row = sqlx::query_as::<_, NamespaceRow>(&format!(
                "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name = ?"
            ))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_removed_tag_expiration(
            &self,
            namespace_id: i64,
            window: RetentionWindow,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE namespaces SET removed_tag_expiration_s = ? WHERE namespace_id = ?",
            )
            .bind(window_secs(window))
            .bind(namespace_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("namespace {namespace_id}")));
            }
            Ok(())
        }

        async fn list_retention_windows(&self) -> MetadataResult<Vec<RetentionWindow>> {
            let secs: Vec<i64> = sqlx::query_scalar(
                "SELECT DISTINCT removed_tag_expiration_s FROM namespaces ORDER BY 1",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(secs
                .into_iter()
                .map(|s| RetentionWindow::from_secs(s.max(0) as u64))
                .collect())
        }
    }

    #[async_trait]
    impl RepositoryRepo for SqliteStore {
        async fn create_repository(
            &self,
            namespace_id: i64,
            name: &str,
        ) -> MetadataResult<RepositoryRow> {
            sqlx::query_as::<_, RepositoryRow>(&format!(
                "INSERT INTO repositories (namespace_id, name, state, created_at) \
                 VALUES (?, ?, ?, ?) RETURNING {REPOSITORY_COLUMNS}"
            ))
            .bind(namespace_id)
            .bind(name)
            .bind(RepositoryState::Normal.as_str())
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint_violation(e, || format!("repository {namespace_id}/{name}")))
        }

        async fn get_repository(
            &self,
            repository_id: i64,
        ) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(&format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE repository_id = ?"
            ))
            .bind(repository_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_repository_by_name(
            &self,
            namespace: &str,
            name: &str,
        ) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(
                r#"
                SELECT r.repository_id, r.namespace_id, r.name, r.state, r.created_at
                FROM repositories r
                INNER JOIN namespaces n ON n.namespace_id = r.namespace_id
                WHERE n.name = ? AND r.name = ?
                "#,
            )
            .bind(namespace)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_repositories(&self) -> MetadataResult<Vec<RepositoryRow>> {
            let rows = sqlx::query_as::<_, RepositoryRow>(&format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY repository_id"
            ))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_repository_state(
            &self,
            repository_id: i64,
            state: RepositoryState,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE repositories SET state = ? WHERE repository_id = ?")
                .bind(state.as_str())
                .bind(repository_id)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("repository {repository_id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TagRepo for SqliteStore {
        async fn retarget_tag(
            &self,
            repository_id: i64,
            name: &str,
            target: TagTarget,
            now_ms: i64,
            lifetime_end_ms: Option<i64>,
        ) -> MetadataResult<TagRow> {
            let (manifest_id, image_id) = match target {
                TagTarget::Manifest(id) => (Some(id), None),
                TagTarget::Image(id) => (None, Some(id)),
            };

            // End the previous row and insert the new one atomically so GC
            // never sees the name with no active row.
            let mut tx = self.pool.begin().await?;

            sqlx::query(&format!(
                "UPDATE tags SET lifetime_end_ms = ? \
                 WHERE repository_id = ? AND name = ? AND {ACTIVE_TAG_PREDICATE}"
            ))
            .bind(now_ms)
            .bind(repository_id)
            .bind(name)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;

            let tag = sqlx::query_as::<_, TagRow>(&format!(
                "INSERT INTO tags (repository_id, name, manifest_id, image_id, lifetime_start_ms, lifetime_end_ms) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING {TAG_COLUMNS}"
            ))
            .bind(repository_id)
            .bind(name)
            .bind(manifest_id)
            .bind(image_id)
            .bind(now_ms)
            .bind(lifetime_end_ms)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(tag)
        }

        async fn delete_tag(
            &self,
            repository_id: i64,
            name: &str,
            now_ms: i64,
        ) -> MetadataResult<Option<TagRow>> {
            let row = sqlx::query_as::<_, TagRow>(&format!(
                "UPDATE tags SET lifetime_end_ms = ? \
                 WHERE tag_id = ( \
                     SELECT tag_id FROM tags \
                     WHERE repository_id = ? AND name = ? AND {ACTIVE_TAG_PREDICATE} \
                     ORDER BY lifetime_start_ms DESC, tag_id DESC LIMIT 1 \
                 ) RETURNING {TAG_COLUMNS}"
            ))
            .bind(now_ms)
            .bind(repository_id)
            .bind(name)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_active_tag(
            &self,
            repository_id: i64,
            name: &str,
            now_ms: i64,
        ) -> MetadataResult<Option<TagRow>> {
            let row = sqlx::query_as::<_, TagRow>(&format!(
                "SELECT {TAG_COLUMNS} FROM tags \
                 WHERE repository_id = ? AND name = ? AND {ACTIVE_TAG_PREDICATE} \
                 ORDER BY lifetime_start_ms DESC, tag_id DESC LIMIT 1"
            ))
            .bind(repository_id)
            .bind(name)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_tags(&self, repository_id: i64) -> MetadataResult<Vec<TagRow>> {
            let rows = sqlx::query_as::<_, TagRow>(&format!(
                "SELECT {TAG_COLUMNS} FROM tags WHERE repository_id = ? ORDER BY tag_id"
            ))
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ManifestRepo for SqliteStore {
        async fn create_manifest(&self, manifest: &NewManifest) -> MetadataResult<ManifestRow> {
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, ManifestRow>(&format!(
                "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE repository_id = ? AND digest = ?"
            ))
            .bind(manifest.repository_id)
            .bind(&manifest.digest)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(existing) = existing {
                tx.rollback().await?;
                return Ok(existing);
            }

            let row = sqlx::query_as::<_, ManifestRow>(&format!(
                "INSERT INTO manifests (repository_id, digest, media_type, manifest_bytes, created_at) \
                 VALUES (?, ?, ?, ?, ?) RETURNING {MANIFEST_COLUMNS}"
            ))
            .bind(manifest.repository_id)
            .bind(&manifest.digest)
            .bind(&manifest.media_type)
            .bind(&manifest.manifest_bytes)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&mut *tx)
            .await?;

            for blob_id in &manifest.blob_ids {
                sqlx::query(
                    "INSERT OR IGNORE INTO manifest_blobs (manifest_id, blob_id, repository_id) \
                     VALUES (?, ?, ?)",
                )
                .bind(row.manifest_id)
                .bind(blob_id)
                .bind(manifest.repository_id)
                .execute(&mut *tx)
                .await?;
            }

            for NewLabel {
                key,
                value,
                media_type,
            } in &manifest.labels
            {
                let label_id: i64 = sqlx::query_scalar(
                    "INSERT INTO labels (key, value, media_type) VALUES (?, ?, ?) RETURNING label_id",
                )
                .bind(key)
                .bind(value)
                .bind(media_type)
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO manifest_labels (manifest_id, label_id, repository_id) VALUES (?, ?, ?)",
                )
                .bind(row.manifest_id)
                .bind(label_id)
                .bind(manifest.repository_id)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(row)
        }

        async fn get_manifest(&self, manifest_id: i64) -> MetadataResult<Option<ManifestRow>> {
            let row = sqlx::query_as::<_, ManifestRow>(&format!(
                "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE manifest_id = ?"
            ))
            .bind(manifest_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_manifest_by_digest(
            &self,
            repository_id: i64,
            digest: &str,
        ) -> MetadataResult<Option<ManifestRow>> {
            let row = sqlx::query_as::<_, ManifestRow>(&format!(
                "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE repository_id = ? AND digest = ?"
            ))
            .bind(repository_id)
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_manifests(&self, repository_id: i64) -> MetadataResult<Vec<ManifestRow>> {
            let rows = sqlx::query_as::<_, ManifestRow>(&format!(
                "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE repository_id = ? ORDER BY manifest_id"
            ))
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn manifest_blobs(&self, manifest_id: i64) -> MetadataResult<Vec<StorageRow>> {
            let rows = sqlx::query_as::<_, StorageRow>(
                r#"
                SELECT s.storage_id, s.uuid, s.content_checksum, s.image_size, s.created_at
                FROM manifest_blobs mb
                INNER JOIN image_storage s ON s.storage_id = mb.blob_id
                WHERE mb.manifest_id = ?
                ORDER BY s.storage_id
                "#,
            )
            .bind(manifest_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl LabelRepo for SqliteStore {
        async fn get_label(&self, label_id: i64) -> MetadataResult<Option<LabelRow>> {
            let row = sqlx::query_as::<_, LabelRow>(&format!(
                "SELECT {LABEL_COLUMNS} FROM labels WHERE label_id = ?"
            ))
            .bind(label_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_manifest_labels(&self, manifest_id: i64) -> MetadataResult<Vec<LabelRow>> {
            let rows = sqlx::query_as::<_, LabelRow>(
                r#"
                SELECT l.label_id, l.key, l.value, l.media_type
                FROM manifest_labels ml
                INNER JOIN labels l ON l.label_id = ml.label_id
                WHERE ml.manifest_id = ?
                ORDER BY l.label_id
                "#,
            )
            .bind(manifest_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ImageRepo for SqliteStore {
        async fn create_image(
            &self,
            repository_id: i64,
            docker_image_id: &str,
            storage_id: i64,
            parent_id: Option<i64>,
        ) -> MetadataResult<ImageRow> {
            sqlx::query_as::<_, ImageRow>(&format!(
                "INSERT INTO images (repository_id, docker_image_id, storage_id, parent_id, created_at) \
                 VALUES (?, ?, ?, ?, ?) RETURNING {IMAGE_COLUMNS}"
            ))
            .bind(repository_id)
            .bind(docker_image_id)
            .bind(storage_id)
            .bind(parent_id)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint_violation(e, || format!("image {docker_image_id}")))
        }

        async fn get_image(&self, image_id: i64) -> MetadataResult<Option<ImageRow>> {
            let row = sqlx::query_as::<_, ImageRow>(&format!(
                "SELECT {IMAGE_COLUMNS} FROM images WHERE image_id = ?"
            ))
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_images(&self, repository_id: i64) -> MetadataResult<Vec<ImageRow>> {
            let rows = sqlx::query_as::<_, ImageRow>(&format!(
                "SELECT {IMAGE_COLUMNS} FROM images WHERE repository_id = ? ORDER BY image_id"
            ))
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn create_derived_storage(
            &self,
            source_image_id: i64,
            derivative_id: i64,
            transformation: &str,
        ) -> MetadataResult<DerivedStorageRow> {
            sqlx::query_as::<_, DerivedStorageRow>(&format!(
                "INSERT INTO derived_storage_for_image (source_image_id, derivative_id, transformation) \
                 VALUES (?, ?, ?) RETURNING {DERIVED_COLUMNS}"
            ))
            .bind(source_image_id)
            .bind(derivative_id)
            .bind(transformation)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_constraint_violation(e, || {
                    format!("derived storage {transformation} for image {source_image_id}")
                })
            })
        }

        async fn list_derived_storage(
            &self,
            source_image_id: i64,
        ) -> MetadataResult<Vec<DerivedStorageRow>> {
            let rows = sqlx::query_as::<_, DerivedStorageRow>(&format!(
                "SELECT {DERIVED_COLUMNS} FROM derived_storage_for_image WHERE source_image_id = ?"
            ))
            .bind(source_image_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl StorageRepo for SqliteStore {
        async fn ensure_location(&self, name: &str) -> MetadataResult<i64> {
            let mut conn = self.pool.acquire().await?;
            ensure_location_in(&mut conn, name).await
        }

        async fn store_blob_record(
            &self,
            digest: &BlobDigest,
            location: &str,
            size: i64,
        ) -> MetadataResult<StorageRow> {
            let mut tx = self.pool.begin().await?;
            let storage = store_blob_in(&mut tx, digest, location, size).await?;
            tx.commit().await?;
            Ok(storage)
        }

        async fn store_blob_record_and_temp_link(
            &self,
            repository_id: i64,
            digest: &BlobDigest,
            location: &str,
            size: i64,
            expires_at_ms: i64,
        ) -> MetadataResult<StorageRow> {
            let mut tx = self.pool.begin().await?;
            let storage = store_blob_in(&mut tx, digest, location, size).await?;

            sqlx::query(
                "INSERT INTO uploaded_blobs (repository_id, blob_id, expires_at_ms, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(repository_id)
            .bind(storage.storage_id)
            .bind(expires_at_ms)
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(storage)
        }

        async fn get_storage(&self, storage_id: i64) -> MetadataResult<Option<StorageRow>> {
            let row = sqlx::query_as::<_, StorageRow>(&format!(
                "SELECT {STORAGE_COLUMNS} FROM image_storage WHERE storage_id = ?"
            ))
            .bind(storage_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_storage_by_digest(
            &self,
            digest: &BlobDigest,
        ) -> MetadataResult<Option<StorageRow>> {
            let row = sqlx::query_as::<_, StorageRow>(&format!(
                "SELECT {STORAGE_COLUMNS} FROM image_storage WHERE content_checksum = ?"
            ))
            .bind(digest.to_string())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn storage_locations(&self, storage_id: i64) -> MetadataResult<Vec<String>> {
            let mut conn = self.pool.acquire().await?;
            storage_locations_in(&mut conn, storage_id).await
        }

        async fn list_uploaded_blobs(
            &self,
            repository_id: i64,
        ) -> MetadataResult<Vec<UploadedBlobRow>> {
            let rows = sqlx::query_as::<_, UploadedBlobRow>(&format!(
                "SELECT {UPLOADED_BLOB_COLUMNS} FROM uploaded_blobs \
                 WHERE repository_id = ? ORDER BY uploaded_blob_id"
            ))
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl GcRepo for SqliteStore {
        async fn find_repository_with_garbage(
            &self,
            now_ms: i64,
            threshold_ms: i64,
            policy: Option<RetentionWindow>,
            exclude: &[i64],
        ) -> MetadataResult<Option<RepositoryRow>> {
            let policy_secs = policy.map(window_secs);
            let exclusion = if exclude.is_empty() {
                String::new()
            } else {
                format!(
                    "AND r.repository_id NOT IN ({})",
                    vec!["?"; exclude.len()].join(", ")
                )
            };
            let sql = format!(
                r#"
                SELECT r.repository_id, r.namespace_id, r.name, r.state, r.created_at
                FROM repositories r
                INNER JOIN namespaces n ON n.namespace_id = r.namespace_id
                WHERE EXISTS (
                    SELECT 1 FROM tags t
                    WHERE t.repository_id = r.repository_id
                      AND t.lifetime_end_ms IS NOT NULL
                      AND t.lifetime_end_ms + n.removed_tag_expiration_s * 1000 <= ?
                )
                AND (? IS NULL OR n.removed_tag_expiration_s = ?)
                {exclusion}
                ORDER BY RANDOM()
                LIMIT 1
                "#
            );

            let mut query = sqlx::query_as::<_, RepositoryRow>(&sql)
                .bind(now_ms.saturating_sub(threshold_ms))
                .bind(policy_secs)
                .bind(policy_secs);
            for repository_id in exclude {
                query = query.bind(*repository_id);
            }
            let row = query.fetch_optional(&self.pool).await?;
            Ok(row)
        }

        async fn garbage_stats(&self) -> MetadataResult<GarbageStats> {
            let (storages, labels, manifests): (i64, i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM image_storage s
                     WHERE NOT EXISTS (SELECT 1 FROM manifest_blobs mb WHERE mb.blob_id = s.storage_id)
                       AND NOT EXISTS (SELECT 1 FROM images i WHERE i.storage_id = s.storage_id)
                       AND NOT EXISTS (SELECT 1 FROM uploaded_blobs ub WHERE ub.blob_id = s.storage_id)
                       AND NOT EXISTS (SELECT 1 FROM derived_storage_for_image d
                                       WHERE d.derivative_id = s.storage_id)),
                    (SELECT COUNT(*) FROM labels l
                     WHERE NOT EXISTS (SELECT 1 FROM manifest_labels ml WHERE ml.label_id = l.label_id)),
                    (SELECT COUNT(*) FROM manifests m
                     WHERE NOT EXISTS (SELECT 1 FROM tags t WHERE t.manifest_id = m.manifest_id))
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

            Ok(GarbageStats {
                dangling_storages: storages as u64,
                dangling_labels: labels as u64,
                dangling_manifests: manifests as u64,
            })
        }

        async fn begin_catalog_transaction(&self) -> MetadataResult<Box<dyn CatalogTransaction>> {
            let tx = self.pool.begin().await?;
            Ok(Box::new(SqliteCatalogTransaction { tx }))
        }
    }

    /// Catalog transaction over one pooled SQLite connection.
    pub struct SqliteCatalogTransaction {
        tx: Transaction<'static, Sqlite>,
    }

    #[async_trait]
    impl CatalogTransaction for SqliteCatalogTransaction {
        async fn commit(self: Box<Self>) -> MetadataResult<()> {
            let Self { tx } = *self;
            tx.commit().await?;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> MetadataResult<()> {
            let Self { tx } = *self;
            tx.rollback().await?;
            Ok(())
        }

        async fn repository(
            &mut self,
            repository_id: i64,
        ) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(&format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE repository_id = ?"
            ))
            .bind(repository_id)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn retention_window(&mut self, repository_id: i64) -> MetadataResult<RetentionWindow> {
            let secs: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT n.removed_tag_expiration_s
                FROM repositories r
                INNER JOIN namespaces n ON n.namespace_id = r.namespace_id
                WHERE r.repository_id = ?
                "#,
            )
            .bind(repository_id)
            .fetch_optional(&mut *self.tx)
            .await?;

            secs.map(|s| RetentionWindow::from_secs(s.max(0) as u64))
                .ok_or_else(|| MetadataError::NotFound(format!("repository {repository_id}")))
        }

        async fn tags(&mut self, repository_id: i64) -> MetadataResult<Vec<TagRow>> {
            let rows = sqlx::query_as::<_, TagRow>(&format!(
                "SELECT {TAG_COLUMNS} FROM tags WHERE repository_id = ? ORDER BY tag_id"
            ))
            .bind(repository_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn manifests(&mut self, repository_id: i64) -> MetadataResult<Vec<ManifestRow>> {
            let rows = sqlx::query_as::<_, ManifestRow>(&format!(
                "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE repository_id = ? ORDER BY manifest_id"
            ))
            .bind(repository_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn images(&mut self, repository_id: i64) -> MetadataResult<Vec<ImageRow>> {
            let rows = sqlx::query_as::<_, ImageRow>(&format!(
                "SELECT {IMAGE_COLUMNS} FROM images WHERE repository_id = ? ORDER BY image_id"
            ))
            .bind(repository_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn get_storage(&mut self, storage_id: i64) -> MetadataResult<Option<StorageRow>> {
            let row = sqlx::query_as::<_, StorageRow>(&format!(
                "SELECT {STORAGE_COLUMNS} FROM image_storage WHERE storage_id = ?"
            ))
            .bind(storage_id)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn storage_locations(&mut self, storage_id: i64) -> MetadataResult<Vec<String>> {
            storage_locations_in(&mut self.tx, storage_id).await
        }

        async fn storage_owner_count(
            &mut self,
            storage_id: i64,
            now_ms: i64,
        ) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM manifest_blobs WHERE blob_id = ?1)
                  + (SELECT COUNT(*) FROM images WHERE storage_id = ?1)
                  + (SELECT COUNT(*) FROM uploaded_blobs WHERE blob_id = ?1 AND expires_at_ms > ?2)
                  + (SELECT COUNT(*) FROM derived_storage_for_image WHERE derivative_id = ?1)
                "#,
            )
            .bind(storage_id)
            .bind(now_ms)
            .fetch_one(&mut *self.tx)
            .await?;
            Ok(count.max(0) as u64)
        }

        async fn delete_tags(&mut self, tag_ids: &[i64]) -> MetadataResult<u64> {
            let mut deleted = 0;
            for tag_id in tag_ids {
                deleted += sqlx::query("DELETE FROM tags WHERE tag_id = ?")
                    .bind(tag_id)
                    .execute(&mut *self.tx)
                    .await?
                    .rows_affected();
            }
            Ok(deleted)
        }

        async fn delete_manifest_blobs(
            &mut self,
            manifest_ids: &[i64],
        ) -> MetadataResult<Vec<i64>> {
            let mut storage_ids = BTreeSet::new();
            for manifest_id in manifest_ids {
                let ids: Vec<i64> = sqlx::query_scalar(
                    "DELETE FROM manifest_blobs WHERE manifest_id = ? RETURNING blob_id",
                )
                .bind(manifest_id)
                .fetch_all(&mut *self.tx)
                .await?;
                storage_ids.extend(ids);
            }
            Ok(storage_ids.into_iter().collect())
        }

        async fn delete_manifest_labels(
            &mut self,
            manifest_ids: &[i64],
        ) -> MetadataResult<Vec<i64>> {
            let mut label_ids = BTreeSet::new();
            for manifest_id in manifest_ids {
                let ids: Vec<i64> = sqlx::query_scalar(
                    "DELETE FROM manifest_labels WHERE manifest_id = ? RETURNING label_id",
                )
                .bind(manifest_id)
                .fetch_all(&mut *self.tx)
                .await?;
                label_ids.extend(ids);
            }
            Ok(label_ids.into_iter().collect())
        }

        async fn delete_unreferenced_labels(&mut self, label_ids: &[i64]) -> MetadataResult<u64> {
            let mut deleted = 0;
            for label_id in label_ids {
                deleted += sqlx::query(
                    r#"
                    DELETE FROM labels
                    WHERE label_id = ?1
                      AND NOT EXISTS (SELECT 1 FROM manifest_labels WHERE label_id = ?1)
                    "#,
                )
                .bind(label_id)
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
            }
            Ok(deleted)
        }

        async fn delete_manifests(&mut self, manifest_ids: &[i64]) -> MetadataResult<u64> {
            let mut deleted = 0;
            for manifest_id in manifest_ids {
                deleted += sqlx::query("DELETE FROM manifests WHERE manifest_id = ?")
                    .bind(manifest_id)
                    .execute(&mut *self.tx)
                    .await?
                    .rows_affected();
            }
            Ok(deleted)
        }

        async fn delete_derived_storage(&mut self, image_ids: &[i64]) -> MetadataResult<Vec<i64>> {
            let mut storage_ids = BTreeSet::new();
            for image_id in image_ids {
                let ids: Vec<i64> = sqlx::query_scalar(
                    "DELETE FROM derived_storage_for_image WHERE source_image_id = ? RETURNING derivative_id",
                )
                .bind(image_id)
                .fetch_all(&mut *self.tx)
                .await?;
                storage_ids.extend(ids);
            }
            Ok(storage_ids.into_iter().collect())
        }

        async fn delete_images(&mut self, image_ids: &[i64]) -> MetadataResult<u64> {
            let mut deleted = 0;
            for image_id in image_ids {
                deleted += sqlx::query("DELETE FROM images WHERE image_id = ?")
                    .bind(image_id)
                    .execute(&mut *self.tx)
                    .await?
                    .rows_affected();
            }
            Ok(deleted)
        }

        async fn delete_uploaded_blobs(&mut self, repository_id: i64) -> MetadataResult<Vec<i64>> {
            let ids: Vec<i64> = sqlx::query_scalar(
                "DELETE FROM uploaded_blobs WHERE repository_id = ? RETURNING blob_id",
            )
            .bind(repository_id)
            .fetch_all(&mut *self.tx)
            .await?;
            let unique: BTreeSet<i64> = ids.into_iter().collect();
            Ok(unique.into_iter().collect())
        }

        async fn delete_expired_uploaded_blobs(
            &mut self,
            now_ms: i64,
            limit: u32,
        ) -> MetadataResult<Vec<i64>> {
            let ids: Vec<i64> = sqlx::query_scalar(
                r#"
                DELETE FROM uploaded_blobs
                WHERE uploaded_blob_id IN (
                    SELECT uploaded_blob_id FROM uploaded_blobs
                    WHERE expires_at_ms <= ?
                    ORDER BY expires_at_ms
                    LIMIT ?
                )
                RETURNING blob_id
                "#,
            )
            .bind(now_ms)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;
            let unique: BTreeSet<i64> = ids.into_iter().collect();
            Ok(unique.into_iter().collect())
        }

        async fn delete_storage(&mut self, storage_id: i64) -> MetadataResult<bool> {
            // Only expired links can remain once the owner count is zero.
            sqlx::query("DELETE FROM uploaded_blobs WHERE blob_id = ?")
                .bind(storage_id)
                .execute(&mut *self.tx)
                .await?;
            sqlx::query("DELETE FROM image_storage_placements WHERE storage_id = ?")
                .bind(storage_id)
                .execute(&mut *self.tx)
                .await?;
            let result = sqlx::query("DELETE FROM image_storage WHERE storage_id = ?")
                .bind(storage_id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_repository(&mut self, repository_id: i64) -> MetadataResult<()> {
            sqlx::query("DELETE FROM tags WHERE repository_id = ?")
                .bind(repository_id)
                .execute(&mut *self.tx)
                .await?;
            let result = sqlx::query("DELETE FROM repositories WHERE repository_id = ?")
                .bind(repository_id)
                .execute(&mut *self.tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("repository {repository_id}")));
            }
            Ok(())
        }
    }
}

pub use sqlite_impl::SqliteCatalogTransaction;

const SCHEMA_SQL: &str = r#"
-- Namespaces carry the removed-tag retention window
CREATE TABLE IF NOT EXISTS namespaces (
    namespace_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    removed_tag_expiration_s INTEGER NOT NULL DEFAULT 1209600,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repositories (
    repository_id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(namespace_id),
    name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'normal',
    created_at TEXT NOT NULL,
    UNIQUE (namespace_id, name)
);

-- Global content-addressed storage objects
CREATE TABLE IF NOT EXISTS image_storage (
    storage_id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid BLOB NOT NULL UNIQUE,
    content_checksum TEXT NOT NULL UNIQUE,
    image_size INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS image_storage_locations (
    location_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS image_storage_placements (
    storage_id INTEGER NOT NULL REFERENCES image_storage(storage_id),
    location_id INTEGER NOT NULL REFERENCES image_storage_locations(location_id),
    PRIMARY KEY (storage_id, location_id)
);

CREATE TABLE IF NOT EXISTS manifests (
    manifest_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(repository_id),
    digest TEXT NOT NULL,
    media_type TEXT NOT NULL,
    manifest_bytes TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (repository_id, digest)
);

CREATE TABLE IF NOT EXISTS manifest_blobs (
    manifest_id INTEGER NOT NULL REFERENCES manifests(manifest_id),
    blob_id INTEGER NOT NULL REFERENCES image_storage(storage_id),
    repository_id INTEGER NOT NULL REFERENCES repositories(repository_id),
    PRIMARY KEY (manifest_id, blob_id)
);
CREATE INDEX IF NOT EXISTS idx_manifest_blobs_blob ON manifest_blobs(blob_id);

CREATE TABLE IF NOT EXISTS labels (
    label_id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    media_type TEXT NOT NULL DEFAULT 'text/plain'
);

CREATE TABLE IF NOT EXISTS manifest_labels (
    manifest_id INTEGER NOT NULL REFERENCES manifests(manifest_id),
    label_id INTEGER NOT NULL REFERENCES labels(label_id),
    repository_id INTEGER NOT NULL REFERENCES repositories(repository_id),
    PRIMARY KEY (manifest_id, label_id)
);
CREATE INDEX IF NOT EXISTS idx_manifest_labels_label ON manifest_labels(label_id);

-- Legacy parent-linked image trees
CREATE TABLE IF NOT EXISTS images (
    image_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(repository_id),
    docker_image_id TEXT NOT NULL,
    storage_id INTEGER NOT NULL REFERENCES image_storage(storage_id),
    parent_id INTEGER REFERENCES images(image_id),
    created_at TEXT NOT NULL,
    UNIQUE (repository_id, docker_image_id)
);
CREATE INDEX IF NOT EXISTS idx_images_storage ON images(storage_id);
CREATE INDEX IF NOT EXISTS idx_images_parent ON images(parent_id);

CREATE TABLE IF NOT EXISTS derived_storage_for_image (
    derived_id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_image_id INTEGER NOT NULL REFERENCES images(image_id),
    derivative_id INTEGER NOT NULL REFERENCES image_storage(storage_id),
    transformation TEXT NOT NULL,
    UNIQUE (source_image_id, transformation)
);
CREATE INDEX IF NOT EXISTS idx_derived_storage_derivative ON derived_storage_for_image(derivative_id);

-- Tag history: one row per lifetime of a name
CREATE TABLE IF NOT EXISTS tags (
    tag_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(repository_id),
    name TEXT NOT NULL,
    manifest_id INTEGER REFERENCES manifests(manifest_id),
    image_id INTEGER REFERENCES images(image_id),
    lifetime_start_ms INTEGER NOT NULL,
    lifetime_end_ms INTEGER,
    CHECK ((manifest_id IS NULL) <> (image_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_tags_repository_name ON tags(repository_id, name, lifetime_end_ms);
CREATE INDEX IF NOT EXISTS idx_tags_lifetime_end ON tags(lifetime_end_ms);
CREATE INDEX IF NOT EXISTS idx_tags_manifest ON tags(manifest_id);
CREATE INDEX IF NOT EXISTS idx_tags_image ON tags(image_id);

-- Temporary upload owners
CREATE TABLE IF NOT EXISTS uploaded_blobs (
    uploaded_blob_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(repository_id),
    blob_id INTEGER NOT NULL REFERENCES image_storage(storage_id),
    expires_at_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_uploaded_blobs_blob ON uploaded_blobs(blob_id);
CREATE INDEX IF NOT EXISTS idx_uploaded_blobs_expires ON uploaded_blobs(expires_at_ms);
"#;
