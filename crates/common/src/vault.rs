//! The attachment vault: reconciliation and download over pluggable storage
//! and persistence.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::{stream, StreamExt};
use serde::Serialize;

use crate::attachment::{record_dir, Attachment, AttachmentDescriptor, ProductLine, StorageKey};
use crate::crypto::DocumentCipher;
use crate::error::VaultError;
use crate::exports::{DownloadKey, ExportRegistry};
use crate::locks::KeyedMutex;
use crate::normalize::{self, remove_scratch};
use crate::reconcile::{self, Partition};
use crate::records::RecordStore;
use crate::storage::StorageBackend;

#[derive(Debug, Clone)]
pub struct VaultOptions {
    /// Upper bound on attachments processed concurrently within one batch
    pub workers: usize,
}

impl Default for VaultOptions {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Self { workers }
    }
}

/// One reconciliation of a record's attachments.
#[derive(Clone, Copy)]
pub struct ReconcileRequest<'a> {
    pub product: ProductLine,
    pub record_id: &'a str,
    pub desired: &'a [AttachmentDescriptor],
    /// Directory holding the uploaded files of new attachments, each under
    /// its normalized file name
    pub staging_dir: &'a Path,
    /// Session whose download keys must be dropped for deleted attachments
    pub exports: Option<&'a dyn ExportRegistry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub category_updated: usize,
    pub associations_updated: usize,
    pub unchanged: usize,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added {}, deleted {}, category updated {}, associations updated {}, unchanged {}",
            self.added.len(),
            self.deleted.len(),
            self.category_updated,
            self.associations_updated,
            self.unchanged
        )
    }
}

impl From<&Partition> for ReconcileReport {
    fn from(partition: &Partition) -> Self {
        Self {
            added: partition.to_add.iter().map(|a| a.id.clone()).collect(),
            deleted: partition.to_delete.iter().map(|a| a.id.clone()).collect(),
            category_updated: partition.to_update_category.len(),
            associations_updated: partition.to_update_associations.len(),
            unchanged: partition.unchanged.len(),
        }
    }
}

/// Sealed attachment storage for case records.
#[derive(Clone)]
pub struct Vault {
    cipher: DocumentCipher,
    backend: Arc<dyn StorageBackend>,
    records: Arc<dyn RecordStore>,
    locks: Arc<KeyedMutex>,
    workers: usize,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("backend", &self.backend.name())
            .field("locks", &self.locks)
            .field("workers", &self.workers)
            .finish()
    }
}

impl Vault {
    pub fn new(
        cipher: DocumentCipher,
        backend: Arc<dyn StorageBackend>,
        records: Arc<dyn RecordStore>,
        options: VaultOptions,
    ) -> Self {
        Self {
            cipher,
            backend,
            records,
            locks: Arc::new(KeyedMutex::new()),
            workers: options.workers.max(1),
        }
    }

    /// Share a lock registry with other vaults of the same process.
    pub fn with_locks(mut self, locks: Arc<KeyedMutex>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<KeyedMutex> {
        &self.locks
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Bring a record's stored attachments in line with `request.desired`.
    ///
    /// Everything is validated before the first write. After that, storage
    /// and persistence changes are applied partition by partition. Sealed
    /// objects of an upload batch whose rows were not written are removed
    /// again and the staged sources are kept; any other failure part way
    /// leaves the completed steps in place and names every attachment that
    /// failed.
    pub async fn reconcile(&self, request: ReconcileRequest<'_>) -> Result<ReconcileReport, VaultError> {
        let ReconcileRequest {
            product,
            record_id,
            desired,
            staging_dir,
            exports,
        } = request;
        let record = record_dir(product, record_id);
        let _guard = self.locks.acquire(record.clone()).await;

        let current = self.records.load_current_attachments(product, record_id).await?;
        let partition = reconcile::partition(product, record_id, desired, &current)?;
        partition.check_duplicate_names(&current)?;

        if partition.remaining(&current) == 0
            && self.records.has_assigned_cases(product, record_id).await?
        {
            return Err(VaultError::bad_request(
                reconcile::LAST_FILE_OF_ASSIGNED_RECORD,
            ));
        }

        let mut upload_keys = Vec::with_capacity(partition.to_add.len());
        for attachment in &partition.to_add {
            let source = staging_dir.join(&attachment.file_name);
            if !tokio::fs::try_exists(&source).await? {
                return Err(VaultError::bad_request(format!(
                    "Uploaded file not found: {}",
                    attachment.file_name
                )));
            }
            upload_keys.push(StorageKey::new(product, record_id, &attachment.id)?);
        }
        let delete_keys = partition
            .to_delete
            .iter()
            .map(|a| StorageKey::new(product, record_id, &a.id))
            .collect::<Result<Vec<_>, _>>()?;

        let report = ReconcileReport::from(&partition);
        if partition.is_noop() {
            tracing::debug!(record = %record, "attachments already up to date");
            return Ok(report);
        }

        // Rows being replaced by a same-named upload go first, so the new rows
        // never collide with them on the active-name index.
        let added_names: HashSet<&str> = partition
            .to_add
            .iter()
            .map(|a| a.file_name.as_str())
            .collect();
        let (replaced, dropped): (Vec<&Attachment>, Vec<&Attachment>) = partition
            .to_delete
            .iter()
            .partition(|a| added_names.contains(a.file_name.as_str()));
        let (replaced, dropped) = (ids(&replaced), ids(&dropped));

        if !partition.to_add.is_empty() {
            let uploads = partition
                .to_add
                .iter()
                .zip(&upload_keys)
                .map(|(attachment, key)| {
                    tagged(attachment.id.clone(), self.upload(attachment, key, staging_dir))
                })
                .collect();
            if let Err(e) = self.fan_out(uploads).await {
                self.discard_uploads(&upload_keys).await;
                return Err(e);
            }
            self.backend.propagate(&record).await?;

            if !replaced.is_empty() {
                self.records
                    .soft_delete_attachments(product, &replaced, Utc::now())
                    .await?;
            }
            if let Err(e) = self
                .records
                .insert_attachments(product, &partition.to_add)
                .await
            {
                self.discard_uploads(&upload_keys).await;
                self.backend.propagate(&record).await?;
                return Err(e);
            }

            for attachment in &partition.to_add {
                remove_scratch(&staging_dir.join(&attachment.file_name));
            }
        }

        if !partition.to_delete.is_empty() {
            let deletions = partition
                .to_delete
                .iter()
                .zip(&delete_keys)
                .map(|(attachment, key)| tagged(attachment.id.clone(), self.backend.delete(key, true)))
                .collect();
            self.fan_out(deletions).await?;
            self.backend.propagate(&record).await?;

            if !dropped.is_empty() {
                self.records
                    .soft_delete_attachments(product, &dropped, Utc::now())
                    .await?;
            }

            if let Some(exports) = exports {
                for attachment in &partition.to_delete {
                    if let Err(e) = exports.unregister_attachment(&attachment.id) {
                        tracing::warn!(attachment_id = %attachment.id, error = %e, "failed to drop download keys");
                    }
                }
            }
        }

        if !partition.to_update_category.is_empty() {
            self.records
                .update_category(product, &partition.to_update_category)
                .await?;
        }
        if !partition.to_update_associations.is_empty() {
            self.records
                .update_associations(product, &partition.to_update_associations)
                .await?;
        }

        tracing::info!(record = %record, %report, "reconciled attachments");
        Ok(report)
    }

    /// Reseal an attachment under the export session's passphrase and
    /// register the artifact with the session.
    ///
    /// The artifact lives at `<destination>/<attachmentId>/<stem>.pdf`.
    /// Concurrent downloads of the same attachment into the same session
    /// serialize on that path; whoever comes second finds the artifact in
    /// place and gets a key to it without decrypting again.
    pub async fn download(
        &self,
        product: ProductLine,
        attachment_id: &str,
        exports: &dyn ExportRegistry,
    ) -> Result<DownloadKey, VaultError> {
        let attachment = self
            .records
            .get_attachment(product, attachment_id)
            .await?
            .filter(Attachment::is_active)
            .ok_or_else(|| VaultError::not_found(reconcile::UNKNOWN_FILE))?;
        let key = StorageKey::new(product, &attachment.record_id, &attachment.id)?;

        let target = export_path(exports.destination_dir(), &attachment);
        let _guard = self.locks.acquire(target.to_string_lossy()).await;

        if tokio::fs::try_exists(&target).await? {
            tracing::debug!(attachment_id = %attachment.id, path = %target.display(), "export already present");
            return exports.register(&attachment.id, &target, true);
        }

        tokio::fs::create_dir_all(exports.destination_dir()).await?;
        let scratch = tempfile::Builder::new()
            .prefix(".unseal-")
            .tempdir_in(exports.destination_dir())?;
        let sealed = self.backend.copy_out(&key, scratch.path()).await?;

        let cipher = self.cipher.clone();
        let passphrase = exports.passphrase().clone();
        let dest = target.clone();
        let resealed = tokio::task::spawn_blocking(move || cipher.reseal(&sealed, &dest, &passphrase))
            .await
            .map_err(|e| anyhow::anyhow!("reseal task failed: {}", e))?;

        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "failed to remove unseal scratch directory");
        }
        resealed?;

        tracing::info!(attachment_id = %attachment.id, path = %target.display(), "exported attachment");
        exports.register(&attachment.id, &target, true)
    }

    /// Normalize, seal and store one new attachment.
    async fn upload(
        &self,
        attachment: &Attachment,
        key: &StorageKey,
        staging_dir: &Path,
    ) -> Result<(), VaultError> {
        let source = staging_dir.join(&attachment.file_name);
        let sealed = staging_dir.join(format!(".{}.sealed", attachment.id));

        let cipher = self.cipher.clone();
        let (task_source, task_sealed) = (source.clone(), sealed.clone());
        let sealing = tokio::task::spawn_blocking(move || {
            let canonical = normalize::normalize(&task_source)?;
            let sealed = cipher.seal(canonical.path(), &task_sealed);
            canonical.discard();
            sealed
        })
        .await
        .map_err(|e| anyhow::anyhow!("sealing task failed: {}", e))?;

        let stored = match sealing {
            Ok(()) => self.backend.copy_in(&sealed, key).await,
            Err(e) => Err(e),
        };
        remove_scratch(&sealed);
        stored?;

        tracing::debug!(attachment_id = %attachment.id, key = %key, "uploaded attachment");
        Ok(())
    }

    /// Drive `work` on at most `workers` attachments at a time and wait for
    /// all of it. Every failure is kept, tagged with its attachment id.
    async fn fan_out(&self, work: Vec<BoxFuture<'_, Result<(), VaultError>>>) -> Result<(), VaultError> {
        let results: Vec<Result<(), VaultError>> = stream::iter(work)
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let failures: Vec<VaultError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(VaultError::Batch(failures))
        }
    }

    /// Remove the sealed objects of a batch that will not get its rows. The
    /// staged sources stay so the caller can retry.
    async fn discard_uploads(&self, keys: &[StorageKey]) {
        for key in keys {
            if let Err(e) = self.backend.delete(key, true).await {
                tracing::error!(key = %key, error = %e, "sealed object stored without a record row");
            }
        }
    }
}

fn ids(attachments: &[&Attachment]) -> Vec<String> {
    attachments.iter().map(|a| a.id.clone()).collect()
}

/// Box one attachment's work so failures carry its id.
fn tagged<'a>(
    attachment_id: String,
    work: impl Future<Output = Result<(), VaultError>> + Send + 'a,
) -> BoxFuture<'a, Result<(), VaultError>> {
    async move {
        work.await.map_err(|e| {
            tracing::error!(attachment_id = %attachment_id, error = %e, "attachment operation failed");
            e.for_attachment(attachment_id)
        })
    }
    .boxed()
}

/// `<destination>/<attachmentId>/<stem>.pdf`
pub fn export_path(destination: &Path, attachment: &Attachment) -> PathBuf {
    let stem = Path::new(&attachment.file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "attachment".to_string());
    destination
        .join(&attachment.id)
        .join(format!("{}.pdf", stem))
}
