/// In-process collaborators and document fixtures for exercising the vault
///
/// Nothing here touches a database or a remote store: [`MemoryRecords`]
/// stands in for the persistence layer and [`CountingBackend`] wraps any
/// storage backend to count and inject failures. The [`fixtures`] module
/// writes small PDFs, binders, TIFFs and JPEGs on the fly.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use common::prelude::*;
/// use common::testkit::{fixtures, MemoryRecords};
///
/// #[tokio::test]
/// async fn test_upload() -> anyhow::Result<()> {
///     let dir = tempfile::tempdir()?;
///     let records = Arc::new(MemoryRecords::new());
///     let vault = Vault::new(
///         DocumentCipher::new(Passphrase::new("project")),
///         Arc::new(FilesystemBackend::new(dir.path().join("files"))),
///         records.clone(),
///         VaultOptions::default(),
///     );
///
///     fixtures::write_pdf(&dir.path().join("staging/a.pdf"), 1)?;
///     // ...
///     Ok(())
/// }
/// ```
mod backend;
pub mod fixtures;
mod records;

pub use backend::CountingBackend;
pub use records::{Calls, MemoryRecords};
