//! Session export registry.
//!
//! A download hands the caller an opaque [`DownloadKey`] instead of a path. The
//! registry maps that key to the resealed artifact and remembers whether the
//! artifact should be destroyed when the caller's session closes.
//!
//! Every artifact of a session is sealed under the session's passphrase, so a
//! second download of the same attachment can hand back the artifact that is
//! already on disk.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Passphrase;
use crate::error::VaultError;

/// Opaque handle to one exported artifact
pub type DownloadKey = String;

/// Name of the manifest kept by [`SessionExports::open`]
pub const MANIFEST_FILE: &str = "exports.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub attachment_id: String,
    pub path: PathBuf,
    pub delete_on_close: bool,
}

/// Where downloads land and how callers find them again.
pub trait ExportRegistry: Send + Sync {
    /// Directory resealed artifacts are written under.
    fn destination_dir(&self) -> &Path;

    /// Passphrase every artifact of this registry is sealed under.
    fn passphrase(&self) -> &Passphrase;

    /// Register `path` as an export of `attachment_id`. Registering a path
    /// twice returns the key it already has.
    fn register(
        &self,
        attachment_id: &str,
        path: &Path,
        delete_on_close: bool,
    ) -> Result<DownloadKey, VaultError>;

    fn lookup(&self, key: &str) -> Option<ExportEntry>;

    /// Forget every export of `attachment_id`, deleting the artifacts that
    /// were flagged for deletion. Returns how many entries were dropped.
    fn unregister_attachment(&self, attachment_id: &str) -> Result<usize, VaultError>;
}

/// On-disk form of a persisted session.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    passphrase: Passphrase,
    #[serde(default)]
    entries: BTreeMap<DownloadKey, ExportEntry>,
}

#[derive(Serialize)]
struct ManifestRef<'a> {
    passphrase: &'a Passphrase,
    entries: &'a BTreeMap<DownloadKey, ExportEntry>,
}

/// Exports of one caller session.
#[derive(Debug)]
pub struct SessionExports {
    dir: PathBuf,
    passphrase: Passphrase,
    manifest: Option<PathBuf>,
    entries: Mutex<BTreeMap<DownloadKey, ExportEntry>>,
}

impl SessionExports {
    /// A registry that lives only as long as this value.
    pub fn new(dir: impl Into<PathBuf>, passphrase: Passphrase) -> Self {
        Self {
            dir: dir.into(),
            passphrase,
            manifest: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// A registry persisted to `<dir>/exports.json`, picking up the
    /// passphrase and entries of earlier processes. A new session gets a
    /// generated passphrase.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(MANIFEST_FILE);

        let manifest: Manifest = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| anyhow::anyhow!("corrupt export manifest {}: {}", path.display(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest {
                passphrase: Passphrase::generate(),
                entries: BTreeMap::new(),
            },
            Err(e) => return Err(e.into()),
        };

        let exports = Self {
            dir,
            passphrase: manifest.passphrase,
            manifest: Some(path),
            entries: Mutex::new(manifest.entries),
        };
        exports.save(&exports.entries.lock())?;
        Ok(exports)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the session: delete every artifact flagged for deletion, then the
    /// manifest. Failures to delete are logged. Returns how many artifacts
    /// were deleted.
    pub fn close(self) -> Result<usize, VaultError> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut deleted = 0;
        for (key, entry) in entries {
            if entry.delete_on_close && remove_artifact(&entry.path) {
                deleted += 1;
            }
            tracing::debug!(%key, attachment_id = %entry.attachment_id, "closed export");
        }

        if let Some(manifest) = &self.manifest {
            match std::fs::remove_file(manifest) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        // only succeeds once the session directory is empty
        let _ = std::fs::remove_dir(&self.dir);

        tracing::info!(dir = %self.dir.display(), deleted, "session exports closed");
        Ok(deleted)
    }

    fn save(&self, entries: &BTreeMap<DownloadKey, ExportEntry>) -> Result<(), VaultError> {
        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&ManifestRef {
            passphrase: &self.passphrase,
            entries,
        })
        .map_err(|e| anyhow::anyhow!("failed to encode export manifest: {}", e))?;
        let mut staged = tempfile::NamedTempFile::new_in(&self.dir)?;
        staged.write_all(&json)?;
        staged.persist(manifest).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ExportRegistry for SessionExports {
    fn destination_dir(&self) -> &Path {
        &self.dir
    }

    fn passphrase(&self) -> &Passphrase {
        &self.passphrase
    }

    fn register(
        &self,
        attachment_id: &str,
        path: &Path,
        delete_on_close: bool,
    ) -> Result<DownloadKey, VaultError> {
        let mut entries = self.entries.lock();
        if let Some((key, _)) = entries.iter().find(|(_, e)| e.path == path) {
            return Ok(key.clone());
        }

        let key = Uuid::new_v4().simple().to_string();
        entries.insert(
            key.clone(),
            ExportEntry {
                attachment_id: attachment_id.to_string(),
                path: path.to_path_buf(),
                delete_on_close,
            },
        );
        self.save(&entries)?;
        Ok(key)
    }

    fn lookup(&self, key: &str) -> Option<ExportEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn unregister_attachment(&self, attachment_id: &str) -> Result<usize, VaultError> {
        let mut entries = self.entries.lock();
        let keys: Vec<DownloadKey> = entries
            .iter()
            .filter(|(_, e)| e.attachment_id == attachment_id)
            .map(|(k, _)| k.clone())
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        for key in &keys {
            if let Some(entry) = entries.remove(key) {
                if entry.delete_on_close {
                    remove_artifact(&entry.path);
                }
            }
        }
        self.save(&entries)?;
        Ok(keys.len())
    }
}

/// Remove an artifact and, if it is now empty, its per-attachment directory.
fn remove_artifact(path: &Path) -> bool {
    let removed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete exported artifact");
            false
        }
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir(parent);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(dir: &Path, attachment: &str) -> PathBuf {
        let path = dir.join(attachment).join("scan.pdf");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"%PDF").unwrap();
        path
    }

    #[test]
    fn test_register_is_idempotent_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let exports = SessionExports::new(dir.path(), Passphrase::generate());
        let path = artifact(dir.path(), "a-1");

        let first = exports.register("a-1", &path, true).unwrap();
        let second = exports.register("a-1", &path, true).unwrap();
        assert_eq!(first, second);
        assert_eq!(exports.len(), 1);
        assert_eq!(exports.lookup(&first).unwrap().path, path);
    }

    #[test]
    fn test_close_deletes_flagged_artifacts_only() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session-1");
        let exports = SessionExports::new(&session, Passphrase::generate());
        let doomed = artifact(&session, "a-1");
        let kept = artifact(&session, "a-2");
        exports.register("a-1", &doomed, true).unwrap();
        exports.register("a-2", &kept, false).unwrap();

        assert_eq!(exports.close().unwrap(), 1);
        assert!(!doomed.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_manifest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session-2");
        let (key, passphrase) = {
            let exports = SessionExports::open(&session).unwrap();
            let path = artifact(&session, "a-1");
            let key = exports.register("a-1", &path, true).unwrap();
            (key, exports.passphrase().clone())
        };

        let reopened = SessionExports::open(&session).unwrap();
        assert_eq!(reopened.passphrase(), &passphrase);
        assert_eq!(reopened.lookup(&key).unwrap().attachment_id, "a-1");
        assert_eq!(reopened.close().unwrap(), 1);
        assert!(!session.exists());
    }

    #[test]
    fn test_unregister_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let exports = SessionExports::new(dir.path(), Passphrase::generate());
        let path = artifact(dir.path(), "a-1");
        let key = exports.register("a-1", &path, true).unwrap();

        assert_eq!(exports.unregister_attachment("a-1").unwrap(), 1);
        assert!(exports.lookup(&key).is_none());
        assert!(!path.exists());
        assert_eq!(exports.unregister_attachment("a-1").unwrap(), 0);
    }
}
