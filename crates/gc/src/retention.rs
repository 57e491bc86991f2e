//! Retention policy: the per-namespace window during which ended tags keep
//! their targets alive.

use crate::error::{GcError, GcResult};
use std::sync::Arc;
use wharf_core::RetentionWindow;
use wharf_metadata::{MetadataError, MetadataStore};

/// Read and change namespace retention windows.
#[derive(Clone)]
pub struct RetentionPolicy {
    metadata: Arc<dyn MetadataStore>,
}

impl RetentionPolicy {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Current window of a namespace.
    pub async fn expiration_window(&self, namespace: &str) -> GcResult<RetentionWindow> {
        let row = self
            .metadata
            .get_namespace_by_name(namespace)
            .await?
            .ok_or_else(|| GcError::NamespaceNotFound(namespace.to_string()))?;
        Ok(row.retention_window())
    }

    /// Change the window. Takes effect for passes that start afterwards;
    /// nothing already collected is revisited.
    pub async fn set_expiration_window(
        &self,
        namespace: &str,
        window: RetentionWindow,
    ) -> GcResult<()> {
        let row = self
            .metadata
            .get_namespace_by_name(namespace)
            .await?
            .ok_or_else(|| GcError::NamespaceNotFound(namespace.to_string()))?;

        match self
            .metadata
            .set_removed_tag_expiration(row.namespace_id, window)
            .await
        {
            Ok(()) => {
                tracing::info!(namespace, window_secs = window.as_secs(), "Retention window updated");
                Ok(())
            }
            Err(MetadataError::NotFound(_)) => Err(GcError::NamespaceNotFound(namespace.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Distinct windows in use across namespaces.
    pub async fn gc_policies(&self) -> GcResult<Vec<RetentionWindow>> {
        Ok(self.metadata.list_retention_windows().await?)
    }
}
