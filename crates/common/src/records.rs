//! Persistence collaborator.
//!
//! The vault never owns the record tables. It reads and writes attachment rows
//! through a [`RecordStore`], one discrete call per partition. No transaction
//! spans a whole reconciliation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::attachment::{Attachment, ProductLine};
use crate::error::VaultError;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Active (not soft-deleted) attachments of a record.
    async fn load_current_attachments(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<Vec<Attachment>, VaultError>;

    /// One attachment by id, deleted or not.
    async fn get_attachment(
        &self,
        product: ProductLine,
        attachment_id: &str,
    ) -> Result<Option<Attachment>, VaultError>;

    /// Insert new attachment rows along with their case associations.
    ///
    /// Implementations report a uniqueness violation on the active file names
    /// of a record as [`VaultError::Conflict`].
    async fn insert_attachments(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError>;

    async fn soft_delete_attachments(
        &self,
        product: ProductLine,
        ids: &[String],
        deleted_at: DateTime<Utc>,
    ) -> Result<(), VaultError>;

    /// Store the category of every given attachment.
    async fn update_category(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError>;

    /// Store the visibility flag of every given attachment and rebuild its
    /// case associations from its tags.
    async fn update_associations(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError>;

    /// Whether any case of the record is currently in an assigned workflow
    /// state.
    async fn has_assigned_cases(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<bool, VaultError>;
}
