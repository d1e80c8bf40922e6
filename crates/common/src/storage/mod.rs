//! Storage backends for sealed objects.
//!
//! The vault only ever talks to a [`StorageBackend`]. Two variants exist: the
//! co-located [`FilesystemBackend`] in this crate, and a remote object storage
//! backend in the `casevault-object-store` crate. Both address objects with a
//! [`StorageKey`], whose layout `<productLine>/<recordId>/<attachmentId>/data`
//! must stay bit-exact.

mod filesystem;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::attachment::StorageKey;
use crate::error::VaultError;

pub use filesystem::FilesystemBackend;

/// Uniform copy-in, copy-out and delete over a storage variant.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Store the sealed file at `source` under `key`, replacing any previous
    /// object. `source` is left in place.
    async fn copy_in(&self, source: &Path, key: &StorageKey) -> Result<(), VaultError>;

    /// Materialize the object under `key` inside `dest_dir` and return the
    /// local path, `<dest_dir>/<productLine>/<recordId>/<attachmentId>/data`.
    async fn copy_out(&self, key: &StorageKey, dest_dir: &Path) -> Result<PathBuf, VaultError>;

    /// Remove the object under `key`. With `recursive`, everything stored
    /// under the attachment's directory goes. Deleting a missing object
    /// succeeds.
    async fn delete(&self, key: &StorageKey, recursive: bool) -> Result<(), VaultError>;

    /// Push a changed record directory (`<productLine>/<recordId>`) to the
    /// rest of the cluster. Shared backends have nothing to do.
    async fn propagate(&self, _record_dir: &str) -> Result<(), VaultError> {
        Ok(())
    }
}

/// Hook that replicates a directory of the filesystem backend to the other
/// members of a cluster.
#[async_trait]
pub trait ClusterSync: Send + Sync + fmt::Debug {
    async fn push_directory(&self, dir: &Path) -> Result<(), VaultError>;
}

/// Local path that `copy_out` materializes `key` at under `dest_dir`.
pub fn materialized_path(key: &StorageKey, dest_dir: &Path) -> PathBuf {
    dest_dir.join(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::ProductLine;

    #[test]
    fn test_materialized_path_mirrors_key() {
        let key = StorageKey::new(ProductLine::Dp, "r-1", "a-1").unwrap();
        assert_eq!(
            materialized_path(&key, Path::new("/tmp/out")),
            PathBuf::from("/tmp/out/dp/r-1/a-1/data")
        );
    }
}
