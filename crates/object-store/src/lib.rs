//! Remote object storage backend for the case vault
//!
//! Sealed attachments are stored as objects under
//! `<prefix>/<productLine>/<recordId>/<attachmentId>/data` in S3/MinIO, a
//! local directory or memory. The store is shared by every vault process, so
//! unlike the filesystem backend nothing is propagated after a write.
//!
//! # Example
//!
//! ```rust,no_run
//! use casevault_object_store::{ObjectStoreConfig, RemoteBackend};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), casevault_object_store::RemoteStoreError> {
//! let backend = RemoteBackend::connect(ObjectStoreConfig::Local {
//!     path: PathBuf::from("/tmp/objects"),
//! })
//! .await?;
//! assert_eq!(backend.prefix(), "tqmc_files");
//! # Ok(())
//! # }
//! ```

mod error;
mod storage;

pub use error::{RemoteStoreError, Result};
pub use storage::{ObjectStoreConfig, RemoteBackend, DEFAULT_PREFIX};
