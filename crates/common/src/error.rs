//! Error taxonomy for the vault.
//!
//! Every failure maps onto one of four caller-visible kinds. `BadRequest`,
//! `NotFound` and `Conflict` carry descriptive messages that are safe to show;
//! `Internal` failures keep their detail in the logs and present a generic
//! message to the caller.

use std::fmt;

/// Caller-visible classification of a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::BadRequest => "bad request",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Errors raised by reconciliation, normalization, encryption and storage.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Invalid caller input (names, categories, visibility flags, ...)
    #[error("{0}")]
    BadRequest(String),

    /// Input file extension has no conversion path
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// A PDF declares embedded files but none of them is a usable PDF
    #[error("invalid PDF binder: {0}")]
    InvalidBinder(String),

    /// Input file could not be decoded as the format its extension claims
    #[error("malformed input file: {0}")]
    MalformedInput(String),

    /// Referenced attachment does not exist
    #[error("{0}")]
    NotFound(String),

    /// A concurrent modification invalidated the request
    #[error("{0}")]
    Conflict(String),

    /// Sealing or unsealing a document failed
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Storage backend failure
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Persistence collaborator failure
    #[error("persistence error: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Failure of a single attachment within a batch
    #[error("attachment {attachment_id}: {source}")]
    Attachment {
        attachment_id: String,
        #[source]
        source: Box<VaultError>,
    },

    /// Every failure of a fan-out batch, none dropped
    #[error("{} attachment operation(s) failed: {}", .0.len(), join_messages(.0))]
    Batch(Vec<VaultError>),
}

pub type Result<T> = std::result::Result<T, VaultError>;

fn join_messages(errors: &[VaultError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl VaultError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        VaultError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        VaultError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        VaultError::Conflict(message.into())
    }

    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        VaultError::Backend(Box::new(error))
    }

    pub fn persistence<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        VaultError::Persistence(Box::new(error))
    }

    /// Tag an error with the attachment it belongs to.
    pub fn for_attachment(self, attachment_id: impl Into<String>) -> Self {
        VaultError::Attachment {
            attachment_id: attachment_id.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::BadRequest(_)
            | VaultError::UnsupportedFormat(_)
            | VaultError::InvalidBinder(_)
            | VaultError::MalformedInput(_) => ErrorKind::BadRequest,
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::Conflict(_) => ErrorKind::Conflict,
            VaultError::Crypto(_)
            | VaultError::Backend(_)
            | VaultError::Persistence(_)
            | VaultError::Io(_)
            | VaultError::Pdf(_)
            | VaultError::Internal(_) => ErrorKind::Internal,
            VaultError::Attachment { source, .. } => source.kind(),
            // A batch is as severe as its worst member
            VaultError::Batch(errors) => errors
                .iter()
                .map(VaultError::kind)
                .max()
                .unwrap_or(ErrorKind::Internal),
        }
    }

    /// Message that is safe to hand back to a caller.
    pub fn public_message(&self) -> String {
        match self {
            VaultError::Attachment {
                attachment_id,
                source,
            } => format!("attachment {}: {}", attachment_id, source.public_message()),
            VaultError::Batch(errors) => errors
                .iter()
                .map(VaultError::public_message)
                .collect::<Vec<_>>()
                .join("; "),
            other if other.kind() == ErrorKind::Internal => {
                "An internal error occurred while processing files".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Flatten batch and attachment wrappers into `(attachment id, error)` leaves.
    pub fn failures(&self) -> Vec<(Option<&str>, &VaultError)> {
        match self {
            VaultError::Batch(errors) => errors.iter().flat_map(VaultError::failures).collect(),
            VaultError::Attachment {
                attachment_id,
                source,
            } => source
                .failures()
                .into_iter()
                .map(|(id, e)| (id.or(Some(attachment_id.as_str())), e))
                .collect(),
            other => vec![(None, other)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_messages_are_generic() {
        let err = VaultError::Crypto("bad padding in object 12".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("padding"));
    }

    #[test]
    fn test_batch_kind_is_worst_member() {
        let err = VaultError::Batch(vec![
            VaultError::bad_request("Empty fileName given").for_attachment("a"),
            VaultError::Io(std::io::Error::other("disk gone")).for_attachment("b"),
        ]);
        assert_eq!(err.kind(), ErrorKind::Internal);

        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, Some("a"));
        assert_eq!(failures[1].0, Some("b"));
    }

    #[test]
    fn test_public_message_names_attachment() {
        let err = VaultError::InvalidBinder("scan.pdf".into()).for_attachment("f-1");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.public_message(),
            "attachment f-1: invalid PDF binder: scan.pdf"
        );
    }
}
