//! Shared test utilities for vault integration tests
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use common::prelude::*;
use common::testkit::{fixtures, CountingBackend, MemoryRecords};
use tempfile::TempDir;

pub const PROJECT_SECRET: &str = "project-secret";
pub const RECORD: &str = "rec-1";

pub struct TestEnv {
    pub vault: Vault,
    pub records: MemoryRecords,
    pub backend: Arc<CountingBackend>,
    pub files: PathBuf,
    pub staging: PathBuf,
    pub exports: PathBuf,
    _temp: TempDir,
}

/// Vault over a filesystem backend in a temp dir, in-memory records and a
/// counting wrapper around the backend.
pub fn setup_test_env() -> TestEnv {
    setup_with_backend(|files| Arc::new(FilesystemBackend::new(files)))
}

pub fn setup_with_backend(
    make: impl FnOnce(PathBuf) -> Arc<dyn StorageBackend>,
) -> TestEnv {
    setup(|files| CountingBackend::new(make(files)))
}

pub fn setup(make: impl FnOnce(PathBuf) -> CountingBackend) -> TestEnv {
    let temp = TempDir::new().unwrap();
    let files = temp.path().join("files");
    let staging = temp.path().join("staging");
    let exports = temp.path().join("exports");
    std::fs::create_dir_all(&staging).unwrap();

    let backend = Arc::new(make(files.clone()));
    let records = MemoryRecords::new();
    let vault = Vault::new(
        DocumentCipher::new(Passphrase::new(PROJECT_SECRET)),
        backend.clone(),
        Arc::new(records.clone()),
        VaultOptions { workers: 4 },
    );

    TestEnv {
        vault,
        records,
        backend,
        files,
        staging,
        exports,
        _temp: temp,
    }
}

impl TestEnv {
    /// Write a PDF upload into the staging area.
    pub fn stage_pdf(&self, name: &str, pages: usize) {
        fixtures::write_pdf(&self.staging.join(name), pages).unwrap();
    }

    pub async fn reconcile(
        &self,
        product: ProductLine,
        desired: &[AttachmentDescriptor],
    ) -> Result<ReconcileReport, VaultError> {
        self.vault
            .reconcile(ReconcileRequest {
                product,
                record_id: RECORD,
                desired,
                staging_dir: &self.staging,
                exports: None,
            })
            .await
    }

    /// Upload `names` as single-page PDFs and return the stored attachments.
    pub async fn upload(&self, product: ProductLine, names: &[&str]) -> Vec<Attachment> {
        let mut desired: Vec<AttachmentDescriptor> = self
            .records
            .active(product, RECORD)
            .iter()
            .map(AttachmentDescriptor::keep)
            .collect();
        for name in names {
            self.stage_pdf(name, 1);
            desired.push(upload_descriptor(product, name));
        }
        self.reconcile(product, &desired).await.unwrap();
        self.records.active(product, RECORD)
    }

    pub fn session(&self, name: &str) -> SessionExports {
        SessionExports::new(self.exports.join(name), Passphrase::generate())
    }

    /// Number of sealed objects stored for the test record.
    pub fn stored_object_count(&self, product: ProductLine) -> usize {
        match std::fs::read_dir(self.files.join(product.as_str()).join(RECORD)) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().join("data").exists())
                .count(),
            Err(_) => 0,
        }
    }

    /// Path of the stored object of `attachment`.
    pub fn stored_object(&self, product: ProductLine, attachment: &Attachment) -> PathBuf {
        self.files
            .join(product.as_str())
            .join(RECORD)
            .join(&attachment.id)
            .join("data")
    }
}

/// New-upload descriptor that satisfies the visibility rules of `product`.
pub fn upload_descriptor(product: ProductLine, name: &str) -> AttachmentDescriptor {
    let descriptor = AttachmentDescriptor::new_upload(name, "imaging");
    if product.tracks_case_associations() {
        descriptor.with_visibility(true, &[])
    } else {
        descriptor
    }
}
