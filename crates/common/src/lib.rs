/**
 * Attachment model: record files, their descriptors,
 *  product lines and the storage key convention.
 */
pub mod attachment;
/**
 * Document encryption at rest and on egress.
 *  Seal under the project secret, reseal under a
 *  per-request secret when a file leaves the vault.
 */
pub mod crypto;
pub mod error;
/**
 * Download artifact bookkeeping for a caller session.
 */
pub mod exports;
/**
 * Keyed mutual exclusion over destination paths.
 */
pub mod locks;
/**
 * Conversion of uploaded documents into a single
 *  canonical PDF before they are sealed.
 */
pub mod normalize;
/**
 * Pure diffing of a desired attachment set against
 *  what is currently stored for a record.
 */
pub mod reconcile;
/**
 * Persistence collaborator contract for record files.
 */
pub mod records;
/**
 * Storage backend abstraction and the co-located
 *  filesystem backend.
 */
pub mod storage;
/**
 * In-memory collaborators and document fixtures
 *  for exercising the vault in tests.
 */
pub mod testkit;
/**
 * The vault itself: reconcile and download, wired
 *  over the pieces above.
 */
pub mod vault;

pub mod prelude {
    pub use crate::attachment::{Attachment, AttachmentDescriptor, ProductLine, StorageKey};
    pub use crate::crypto::{DocumentCipher, Passphrase};
    pub use crate::error::{ErrorKind, VaultError};
    pub use crate::exports::{DownloadKey, ExportRegistry, SessionExports};
    pub use crate::locks::KeyedMutex;
    pub use crate::records::RecordStore;
    pub use crate::storage::{ClusterSync, FilesystemBackend, StorageBackend};
    pub use crate::vault::{ReconcileReport, ReconcileRequest, Vault, VaultOptions};
}
