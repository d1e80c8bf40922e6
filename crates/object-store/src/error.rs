//! Error types for the remote storage backend.

use common::error::VaultError;

/// Errors that can occur when talking to remote object storage.
#[derive(Debug, thiserror::Error)]
pub enum RemoteStoreError {
    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Object path could not be built from a storage key
    #[error("invalid object path: {0}")]
    Path(#[from] object_store::path::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before starting the vault.")]
    BucketNotFound(String),

    /// No object stored under the key
    #[error("object not found: {0}")]
    NotFound(String),
}

/// Result type alias for remote store operations.
pub type Result<T> = std::result::Result<T, RemoteStoreError>;

impl From<RemoteStoreError> for VaultError {
    fn from(err: RemoteStoreError) -> Self {
        match err {
            RemoteStoreError::NotFound(attachment_id) => {
                VaultError::not_found(format!("Stored object missing for {}", attachment_id))
            }
            RemoteStoreError::Io(e) => VaultError::Io(e),
            other => VaultError::backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_missing_object_maps_to_not_found() {
        let err: VaultError = RemoteStoreError::NotFound("a-1".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Stored object missing for a-1");
    }

    #[test]
    fn test_store_failures_stay_internal() {
        let err: VaultError = RemoteStoreError::BucketNotFound("files".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("files"));
    }
}
