//! Remote storage backend over S3/MinIO, a local directory or memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::attachment::StorageKey;
use common::error::VaultError;
use common::storage::{materialized_path, StorageBackend};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteStoreError, Result};

/// Key prefix every object of the vault is stored under.
pub const DEFAULT_PREFIX: &str = "tqmc_files";

/// Configuration for the object storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
        /// Optional key prefix (defaults to [`DEFAULT_PREFIX`])
        prefix: Option<String>,
    },
}

impl ObjectStoreConfig {
    /// Key prefix objects are stored under.
    pub fn prefix(&self) -> &str {
        match self {
            ObjectStoreConfig::S3 {
                prefix: Some(prefix),
                ..
            } => prefix.trim_matches('/'),
            _ => DEFAULT_PREFIX,
        }
    }
}

/// Sealed objects kept in a shared object store.
///
/// Every cluster member talks to the same store, so nothing is propagated
/// after a write.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    inner: Arc<dyn ObjectStore>,
    prefix: String,
}

impl RemoteBackend {
    /// Create a backend from configuration. For S3 the bucket must already
    /// exist.
    pub async fn connect(config: ObjectStoreConfig) -> Result<Self> {
        let prefix = config.prefix().to_string();
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),

            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| RemoteStoreError::InvalidConfig(e.to_string()))?,
                )
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
                ..
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| RemoteStoreError::InvalidConfig(e.to_string()))?,
                );
                check_bucket(store.as_ref(), bucket).await?;
                store
            }
        };

        tracing::info!(prefix = %prefix, "remote storage backend ready");
        Ok(Self { inner, prefix })
    }

    /// Ephemeral in-memory backend.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>/<productLine>/<recordId>/<attachmentId>/data`
    pub fn object_path(&self, key: &StorageKey) -> Result<ObjectPath> {
        self.under_prefix(&key.to_string())
    }

    fn under_prefix(&self, location: &str) -> Result<ObjectPath> {
        let full = if self.prefix.is_empty() {
            location.to_string()
        } else {
            format!("{}/{}", self.prefix, location)
        };
        Ok(ObjectPath::parse(full)?)
    }

    async fn put(&self, source: &Path, key: &StorageKey) -> Result<()> {
        let path = self.object_path(key)?;
        let data = Bytes::from(tokio::fs::read(source).await?);
        let size = data.len();
        self.inner.put(&path, data.into()).await?;
        tracing::debug!(key = %key, size, "stored sealed object");
        Ok(())
    }

    async fn get(&self, key: &StorageKey, dest_dir: &Path) -> Result<PathBuf> {
        let path = self.object_path(key)?;
        let data = match self.inner.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(RemoteStoreError::NotFound(key.attachment_id().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let dest = materialized_path(key, dest_dir);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = dest.with_extension("partial");
        if let Err(e) = tokio::fs::write(&partial, &data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        tokio::fs::rename(&partial, &dest).await?;
        Ok(dest)
    }

    async fn remove(&self, key: &StorageKey, recursive: bool) -> Result<()> {
        if !recursive {
            return ignore_missing(self.inner.delete(&self.object_path(key)?).await);
        }

        let prefix = self.under_prefix(&key.attachment_dir())?;
        let locations: Vec<ObjectPath> = self
            .inner
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        for location in &locations {
            ignore_missing(self.inner.delete(location).await)?;
        }
        tracing::debug!(key = %key, removed = locations.len(), "deleted sealed objects");
        Ok(())
    }
}

fn ignore_missing(result: object_store::Result<()>) -> Result<()> {
    match result {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Fail fast when the bucket does not exist.
async fn check_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    let prefix = ObjectPath::from("");
    let mut stream = store.list(Some(&prefix));
    match stream.try_next().await {
        Ok(_) => Ok(()),
        Err(object_store::Error::NotFound { .. }) => {
            Err(RemoteStoreError::BucketNotFound(bucket.to_string()))
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("NoSuchBucket") || msg.contains("bucket") && msg.contains("not") {
                return Err(RemoteStoreError::BucketNotFound(bucket.to_string()));
            }
            Err(e.into())
        }
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "object-store"
    }

    async fn copy_in(&self, source: &Path, key: &StorageKey) -> std::result::Result<(), VaultError> {
        Ok(self.put(source, key).await?)
    }

    async fn copy_out(
        &self,
        key: &StorageKey,
        dest_dir: &Path,
    ) -> std::result::Result<PathBuf, VaultError> {
        Ok(self.get(key, dest_dir).await?)
    }

    async fn delete(&self, key: &StorageKey, recursive: bool) -> std::result::Result<(), VaultError> {
        Ok(self.remove(key, recursive).await?)
    }
}

#[cfg(test)]
mod tests {
    use common::attachment::ProductLine;
    use common::error::ErrorKind;

    use super::*;

    fn key(attachment: &str) -> StorageKey {
        StorageKey::new(ProductLine::Soc, "r-1", attachment).unwrap()
    }

    #[test]
    fn test_object_path_layout() {
        let backend = RemoteBackend::memory();
        assert_eq!(
            backend.object_path(&key("a-1")).unwrap().as_ref(),
            "tqmc_files/soc/r-1/a-1/data"
        );

        let backend = backend.with_prefix("/vault/");
        assert_eq!(
            backend.object_path(&key("a-1")).unwrap().as_ref(),
            "vault/soc/r-1/a-1/data"
        );
    }

    #[test]
    fn test_config_prefix() {
        let config: ObjectStoreConfig = serde_json::from_str(
            r#"{"type":"s3","endpoint":"http://localhost:9000","access_key":"k","secret_key":"s","bucket":"b","region":null,"prefix":"files"}"#,
        )
        .unwrap();
        assert_eq!(config.prefix(), "files");
        assert_eq!(ObjectStoreConfig::Memory.prefix(), DEFAULT_PREFIX);
    }

    #[tokio::test]
    async fn test_copy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sealed.pdf");
        tokio::fs::write(&source, b"sealed bytes").await.unwrap();

        let backend = RemoteBackend::memory();
        backend.copy_in(&source, &key("a-1")).await.unwrap();
        assert!(source.exists());

        let out = backend.copy_out(&key("a-1"), &dir.path().join("out")).await.unwrap();
        assert_eq!(out, dir.path().join("out/soc/r-1/a-1/data"));
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"sealed bytes");
    }

    #[tokio::test]
    async fn test_copy_out_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = RemoteBackend::memory()
            .copy_out(&key("gone"), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_recursive_delete_keeps_neighbours() {
        let backend = RemoteBackend::memory();
        let put = |location: &str| {
            let path = backend.under_prefix(location).unwrap();
            let inner = backend.inner.clone();
            async move { inner.put(&path, Bytes::from_static(b"x").into()).await.unwrap() }
        };
        put("soc/r-1/a-1/data").await;
        put("soc/r-1/a-1/extra").await;
        put("soc/r-1/a-10/data").await;

        backend.delete(&key("a-1"), true).await.unwrap();
        // deleting again is fine
        backend.delete(&key("a-1"), true).await.unwrap();
        backend.delete(&key("a-1"), false).await.unwrap();

        let remaining: Vec<String> = backend
            .inner
            .list(None)
            .map_ok(|m| m.location.to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(remaining, vec!["tqmc_files/soc/r-1/a-10/data".to_string()]);
    }

    #[tokio::test]
    async fn test_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RemoteBackend::connect(ObjectStoreConfig::Local {
            path: dir.path().join("objects"),
        })
        .await
        .unwrap();

        let source = dir.path().join("sealed.pdf");
        tokio::fs::write(&source, b"sealed").await.unwrap();
        backend.copy_in(&source, &key("a-1")).await.unwrap();
        assert!(dir.path().join("objects/tqmc_files/soc/r-1/a-1/data").exists());
    }
}
