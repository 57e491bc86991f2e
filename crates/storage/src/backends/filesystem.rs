//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Blobs stored as files under a root directory, one file per blob path.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob path below the root. Only relative paths made of
    /// normal components are accepted.
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && !path.starts_with(['/', '\\'])
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Sibling scratch file a write lands in before it is renamed into place.
    fn scratch_path(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.partial", Uuid::new_v4()))
    }
}

fn not_found_or_io(path: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        _ => StorageError::Io(e),
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(fs::try_exists(self.resolve(path)?).await?)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let file = self.resolve(path)?;
        let data = fs::read(&file).await.map_err(|e| not_found_or_io(path, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let target = self.resolve(path)?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }

        let scratch = Self::scratch_path(&target);
        let mut file = fs::File::create(&scratch).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&scratch, &target).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        let file = self.resolve(path)?;
        fs::remove_file(&file)
            .await
            .map_err(|e| not_found_or_io(path, e))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StorageResult<()> {
        if !fs::metadata(&self.root).await?.is_dir() {
            return Err(StorageError::Config(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let key = "sha256/ab/abcdef";
        let data = Bytes::from("hello world");

        backend.put(key, data.clone()).await.unwrap();
        assert!(backend.exists(key).await.unwrap());
        assert_eq!(backend.get(key).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend.put("a/b", Bytes::from("x")).await.unwrap();
        backend.delete("a/b").await.unwrap();
        assert!(!backend.exists("a/b").await.unwrap());

        match backend.delete("a/b").await {
            Err(StorageError::NotFound(key)) => assert_eq!(key, "a/b"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        for key in ["../escape", "/etc/passwd", "a/../../b", "./a", ""] {
            assert!(
                matches!(backend.exists(key).await, Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
        backend.health_check().await.unwrap();
        assert_eq!(backend.backend_name(), "filesystem");
    }
}
