use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::attachment::StorageKey;
use crate::error::VaultError;
use crate::storage::StorageBackend;

/// Storage backend wrapper that counts calls and fails on demand.
#[derive(Debug)]
pub struct CountingBackend {
    inner: Arc<dyn StorageBackend>,
    copy_in: AtomicUsize,
    copy_out: AtomicUsize,
    delete: AtomicUsize,
    copy_out_delay: Option<Duration>,
    failing: Mutex<HashSet<String>>,
    fail_all_copy_in: AtomicBool,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            copy_in: AtomicUsize::new(0),
            copy_out: AtomicUsize::new(0),
            delete: AtomicUsize::new(0),
            copy_out_delay: None,
            failing: Mutex::new(HashSet::new()),
            fail_all_copy_in: AtomicBool::new(false),
        }
    }

    /// Hold every copy-out for `delay`, widening race windows.
    pub fn with_copy_out_delay(mut self, delay: Duration) -> Self {
        self.copy_out_delay = Some(delay);
        self
    }

    /// Fail every call for objects of `attachment_id`.
    pub fn fail_attachment(&self, attachment_id: impl Into<String>) {
        self.failing.lock().insert(attachment_id.into());
    }

    /// Fail every copy-in, whatever the attachment.
    pub fn fail_copy_in(&self, fail: bool) {
        self.fail_all_copy_in.store(fail, Ordering::SeqCst);
    }

    pub fn copy_in_count(&self) -> usize {
        self.copy_in.load(Ordering::SeqCst)
    }

    pub fn copy_out_count(&self) -> usize {
        self.copy_out.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.delete.load(Ordering::SeqCst)
    }

    fn check(&self, key: &StorageKey) -> Result<(), VaultError> {
        if self.failing.lock().contains(key.attachment_id()) {
            return Err(VaultError::backend(std::io::Error::other(format!(
                "simulated failure for {}",
                key
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn copy_in(&self, source: &Path, key: &StorageKey) -> Result<(), VaultError> {
        self.copy_in.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_copy_in.load(Ordering::SeqCst) {
            return Err(VaultError::backend(std::io::Error::other("simulated copy-in failure")));
        }
        self.check(key)?;
        self.inner.copy_in(source, key).await
    }

    async fn copy_out(&self, key: &StorageKey, dest_dir: &Path) -> Result<PathBuf, VaultError> {
        self.copy_out.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        if let Some(delay) = self.copy_out_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.copy_out(key, dest_dir).await
    }

    async fn delete(&self, key: &StorageKey, recursive: bool) -> Result<(), VaultError> {
        self.delete.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        self.inner.delete(key, recursive).await
    }

    async fn propagate(&self, record_dir: &str) -> Result<(), VaultError> {
        self.inner.propagate(record_dir).await
    }
}
