//! Cleanup listeners notified when legacy image storage is reclaimed.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use wharf_metadata::models::ImageRow;

/// A legacy image removed together with the storage object it owned.
#[derive(Debug, Clone)]
pub struct RemovedImageStorage {
    pub repository_id: i64,
    pub image_id: i64,
    pub docker_image_id: String,
    pub storage_id: i64,
    /// `sha256:<hex>` digest of the reclaimed object.
    pub digest: String,
}

impl RemovedImageStorage {
    pub(crate) fn new(image: &ImageRow, digest: &str) -> Self {
        Self {
            repository_id: image.repository_id,
            image_id: image.image_id,
            docker_image_id: image.docker_image_id.clone(),
            storage_id: image.storage_id,
            digest: digest.to_string(),
        }
    }
}

/// Hook invoked once per removed (image, storage object) pair, after the
/// catalog change has committed.
pub trait CleanupListener: Send + Sync {
    fn on_image_storage_removed(&self, removed: &RemovedImageStorage);
}

/// Handle returned by [`CleanupListeners::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener set owned by a collector instance.
#[derive(Default)]
pub struct CleanupListeners {
    next_id: AtomicU64,
    listeners: DashMap<u64, Arc<dyn CleanupListener>>,
}

impl CleanupListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn CleanupListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        ListenerId(id)
    }

    /// Returns `false` if the listener was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn notify(&self, removed: &[RemovedImageStorage]) {
        if removed.is_empty() || self.listeners.is_empty() {
            return;
        }
        // Snapshot first so a listener may (un)register without deadlocking the map.
        let listeners: Vec<Arc<dyn CleanupListener>> =
            self.listeners.iter().map(|e| e.value().clone()).collect();
        for event in removed {
            for listener in &listeners {
                listener.on_image_storage_removed(event);
            }
        }
    }
}
