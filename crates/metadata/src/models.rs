//! Database models mapping to the catalog schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;
use wharf_core::{RetentionWindow, TagStatus};

// =============================================================================
// Namespaces and repositories
// =============================================================================

/// Namespace record. Carries the tag retention window.
#[derive(Debug, Clone, FromRow)]
pub struct NamespaceRow {
    pub namespace_id: i64,
    pub name: String,
    pub removed_tag_expiration_s: i64,
    pub created_at: OffsetDateTime,
}

impl NamespaceRow {
    pub fn retention_window(&self) -> RetentionWindow {
        RetentionWindow::from_secs(self.removed_tag_expiration_s.max(0) as u64)
    }
}

/// Repository lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Normal,
    MarkedForDeletion,
}

impl RepositoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::MarkedForDeletion => "marked_for_deletion",
        }
    }
}

/// Repository record.
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub repository_id: i64,
    pub namespace_id: i64,
    pub name: String,
    pub state: String,
    pub created_at: OffsetDateTime,
}

impl RepositoryRow {
    pub fn is_marked_for_deletion(&self) -> bool {
        self.state == RepositoryState::MarkedForDeletion.as_str()
    }
}

// =============================================================================
// Storage objects
// =============================================================================

/// Global, content-addressed storage object.
#[derive(Debug, Clone, FromRow)]
pub struct StorageRow {
    pub storage_id: i64,
    pub uuid: Uuid,
    /// `sha256:<hex>` digest of the content.
    pub content_checksum: String,
    pub image_size: i64,
    pub created_at: OffsetDateTime,
}

/// Named byte-store location.
#[derive(Debug, Clone, FromRow)]
pub struct StorageLocationRow {
    pub location_id: i64,
    pub name: String,
}

/// Temporary owner record created while content is uploaded.
#[derive(Debug, Clone, FromRow)]
pub struct UploadedBlobRow {
    pub uploaded_blob_id: i64,
    pub repository_id: i64,
    pub blob_id: i64,
    pub expires_at_ms: i64,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Manifests and labels
// =============================================================================

/// Manifest record.
#[derive(Debug, Clone, FromRow)]
pub struct ManifestRow {
    pub manifest_id: i64,
    pub repository_id: i64,
    pub digest: String,
    pub media_type: String,
    pub manifest_bytes: String,
    pub created_at: OffsetDateTime,
}

/// Manifest to storage object owner record (config and layers).
#[derive(Debug, Clone, FromRow)]
pub struct ManifestBlobRow {
    pub manifest_id: i64,
    pub blob_id: i64,
    pub repository_id: i64,
}

/// Key/value annotation.
#[derive(Debug, Clone, FromRow)]
pub struct LabelRow {
    pub label_id: i64,
    pub key: String,
    pub value: String,
    pub media_type: String,
}

// =============================================================================
// Legacy images
// =============================================================================

/// Legacy layer in a parent-linked tree.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub image_id: i64,
    pub repository_id: i64,
    pub docker_image_id: String,
    pub storage_id: i64,
    pub parent_id: Option<i64>,
    pub created_at: OffsetDateTime,
}

/// Storage object derived from an image; alive as long as the image is.
#[derive(Debug, Clone, FromRow)]
pub struct DerivedStorageRow {
    pub derived_id: i64,
    pub source_image_id: i64,
    pub derivative_id: i64,
    pub transformation: String,
}

// =============================================================================
// Tags
// =============================================================================

/// What a tag row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTarget {
    Manifest(i64),
    /// Legacy scheme: the topmost image of a layer chain.
    Image(i64),
}

/// Tag record. One row per lifetime of a tag name.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TagRow {
    pub tag_id: i64,
    pub repository_id: i64,
    pub name: String,
    pub manifest_id: Option<i64>,
    pub image_id: Option<i64>,
    pub lifetime_start_ms: i64,
    pub lifetime_end_ms: Option<i64>,
}

impl TagRow {
    pub fn target(&self) -> Option<TagTarget> {
        match (self.manifest_id, self.image_id) {
            (Some(id), _) => Some(TagTarget::Manifest(id)),
            (None, Some(id)) => Some(TagTarget::Image(id)),
            (None, None) => None,
        }
    }

    /// Lifecycle state of this row at `now_ms`.
    pub fn status(&self, now_ms: i64, window: RetentionWindow) -> TagStatus {
        TagStatus::evaluate(now_ms, self.lifetime_end_ms, window)
    }
}

// =============================================================================
// GC accounting
// =============================================================================

/// Counts of catalog rows nothing owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GarbageStats {
    /// Storage objects with no manifest, image, upload or derived owner.
    pub dangling_storages: u64,
    /// Labels no manifest references.
    pub dangling_labels: u64,
    /// Manifests no tag row references.
    pub dangling_manifests: u64,
}
