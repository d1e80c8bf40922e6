use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{materialized_path, ClusterSync, StorageBackend};
use crate::attachment::StorageKey;
use crate::error::VaultError;

/// Sealed objects stored in a directory tree on the local filesystem.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a partially copied object.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
    cluster: Option<Arc<dyn ClusterSync>>,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cluster: None,
        }
    }

    /// Propagate every changed record directory through `sync`.
    pub fn with_cluster_sync(mut self, sync: Arc<dyn ClusterSync>) -> Self {
        self.cluster = Some(sync);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the object for `key` lives on disk.
    pub fn object_path(&self, key: &StorageKey) -> PathBuf {
        materialized_path(key, &self.root)
    }
}

/// Copy `source` to `dest` through a temporary file in the same directory.
async fn copy_atomically(source: &Path, dest: &Path) -> Result<(), VaultError> {
    let dir = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("destination {} has no parent", dest.display()))?;
    tokio::fs::create_dir_all(dir).await?;

    let staged = dir.join(format!(".{}.partial", Uuid::new_v4()));
    if let Err(e) = tokio::fs::copy(source, &staged).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&staged, dest).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn copy_in(&self, source: &Path, key: &StorageKey) -> Result<(), VaultError> {
        let dest = self.object_path(key);
        copy_atomically(source, &dest).await?;
        tracing::debug!(key = %key, path = %dest.display(), "stored sealed object");
        Ok(())
    }

    async fn copy_out(&self, key: &StorageKey, dest_dir: &Path) -> Result<PathBuf, VaultError> {
        let source = self.object_path(key);
        if !tokio::fs::try_exists(&source).await? {
            return Err(VaultError::not_found(format!(
                "Stored object missing for {}",
                key.attachment_id()
            )));
        }
        let dest = materialized_path(key, dest_dir);
        copy_atomically(&source, &dest).await?;
        Ok(dest)
    }

    async fn delete(&self, key: &StorageKey, recursive: bool) -> Result<(), VaultError> {
        let result = if recursive {
            tokio::fs::remove_dir_all(self.root.join(key.attachment_dir())).await
        } else {
            tokio::fs::remove_file(self.object_path(key)).await
        };

        match result {
            Ok(()) => {
                tracing::debug!(key = %key, recursive, "deleted sealed object");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "sealed object already gone");
            }
            Err(e) => return Err(e.into()),
        }

        if !recursive {
            // only succeeds once the attachment directory is empty
            let _ = tokio::fs::remove_dir(self.root.join(key.attachment_dir())).await;
        }
        Ok(())
    }

    async fn propagate(&self, record_dir: &str) -> Result<(), VaultError> {
        let Some(cluster) = &self.cluster else {
            return Ok(());
        };
        let dir = self.root.join(record_dir);
        tracing::debug!(dir = %dir.display(), "propagating record directory");
        cluster.push_directory(&dir).await
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::attachment::ProductLine;

    #[derive(Debug, Default)]
    struct RecordingSync {
        pushed: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ClusterSync for RecordingSync {
        async fn push_directory(&self, dir: &Path) -> Result<(), VaultError> {
            self.pushed.lock().push(dir.to_path_buf());
            Ok(())
        }
    }

    fn key(attachment: &str) -> StorageKey {
        StorageKey::new(ProductLine::Soc, "rec-1", attachment).unwrap()
    }

    #[tokio::test]
    async fn test_copy_in_and_out() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(root.path());

        let source = scratch.path().join("sealed.pdf");
        tokio::fs::write(&source, b"sealed bytes").await.unwrap();
        backend.copy_in(&source, &key("a-1")).await.unwrap();

        assert!(root.path().join("soc/rec-1/a-1/data").exists());
        // source is left alone
        assert!(source.exists());

        let out = backend
            .copy_out(&key("a-1"), &scratch.path().join("out"))
            .await
            .unwrap();
        assert_eq!(out, scratch.path().join("out/soc/rec-1/a-1/data"));
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"sealed bytes");
    }

    #[tokio::test]
    async fn test_copy_out_missing_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(root.path());
        let err = backend
            .copy_out(&key("nope"), root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(root.path());
        backend.delete(&key("never-stored"), false).await.unwrap();
        backend.delete(&key("never-stored"), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_recursive_delete_removes_attachment_dir() {
        let root = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(root.path());
        let source = root.path().join("upload.pdf");
        tokio::fs::write(&source, b"x").await.unwrap();
        backend.copy_in(&source, &key("a-2")).await.unwrap();
        tokio::fs::write(root.path().join("soc/rec-1/a-2/extra"), b"y")
            .await
            .unwrap();

        backend.delete(&key("a-2"), true).await.unwrap();
        assert!(!root.path().join("soc/rec-1/a-2").exists());
    }

    #[tokio::test]
    async fn test_propagate_uses_cluster_hook() {
        let root = tempfile::tempdir().unwrap();
        let sync = Arc::new(RecordingSync::default());
        let backend = FilesystemBackend::new(root.path()).with_cluster_sync(sync.clone());

        backend.propagate("soc/rec-1").await.unwrap();
        assert_eq!(*sync.pushed.lock(), vec![root.path().join("soc/rec-1")]);

        // without a hook nothing happens
        FilesystemBackend::new(root.path())
            .propagate("soc/rec-1")
            .await
            .unwrap();
    }
}
