use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::attachment::{Attachment, ProductLine};
use crate::error::VaultError;
use crate::records::RecordStore;

/// In-memory persistence collaborator
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    inner: Arc<RwLock<MemoryRecordsInner>>,
}

#[derive(Debug, Default)]
struct MemoryRecordsInner {
    /// (product, attachment id) -> row, deleted rows included
    rows: HashMap<(ProductLine, String), Attachment>,
    /// records with a case in an assigned workflow state
    assigned: HashSet<(ProductLine, String)>,
    fail_inserts: bool,
    calls: Calls,
}

/// How often each mutating call was made
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub insert: usize,
    pub soft_delete: usize,
    pub update_category: usize,
    pub update_associations: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("simulated persistence failure")]
struct SimulatedFailure;

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store rows as if they had been inserted earlier.
    pub fn seed(&self, product: ProductLine, attachments: impl IntoIterator<Item = Attachment>) {
        let mut inner = self.inner.write();
        for attachment in attachments {
            inner
                .rows
                .insert((product, attachment.id.clone()), attachment);
        }
    }

    pub fn set_assigned(&self, product: ProductLine, record_id: &str, assigned: bool) {
        let mut inner = self.inner.write();
        let key = (product, record_id.to_string());
        if assigned {
            inner.assigned.insert(key);
        } else {
            inner.assigned.remove(&key);
        }
    }

    /// Make every following insert fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.inner.write().fail_inserts = fail;
    }

    /// Active attachments of a record, by file name.
    pub fn active(&self, product: ProductLine, record_id: &str) -> Vec<Attachment> {
        let inner = self.inner.read();
        let mut active: Vec<Attachment> = inner
            .rows
            .iter()
            .filter(|((p, _), a)| *p == product && a.record_id == record_id && a.is_active())
            .map(|(_, a)| a.clone())
            .collect();
        active.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        active
    }

    /// Any row by id, deleted or not.
    pub fn row(&self, product: ProductLine, id: &str) -> Option<Attachment> {
        self.inner.read().rows.get(&(product, id.to_string())).cloned()
    }

    pub fn calls(&self) -> Calls {
        self.inner.read().calls
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn load_current_attachments(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<Vec<Attachment>, VaultError> {
        Ok(self.active(product, record_id))
    }

    async fn get_attachment(
        &self,
        product: ProductLine,
        attachment_id: &str,
    ) -> Result<Option<Attachment>, VaultError> {
        Ok(self.row(product, attachment_id))
    }

    async fn insert_attachments(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError> {
        let mut inner = self.inner.write();
        inner.calls.insert += 1;
        if inner.fail_inserts {
            return Err(VaultError::persistence(SimulatedFailure));
        }

        // same rule as a unique index over the active names of a record
        for attachment in attachments {
            let taken = inner.rows.iter().any(|((p, _), a)| {
                *p == product
                    && a.is_active()
                    && a.record_id == attachment.record_id
                    && a.file_name == attachment.file_name
            });
            if taken {
                return Err(VaultError::conflict(format!(
                    "File name already in use: {}",
                    attachment.file_name
                )));
            }
        }
        for attachment in attachments {
            inner
                .rows
                .insert((product, attachment.id.clone()), attachment.clone());
        }
        Ok(())
    }

    async fn soft_delete_attachments(
        &self,
        product: ProductLine,
        ids: &[String],
        deleted_at: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        let mut inner = self.inner.write();
        inner.calls.soft_delete += 1;
        for id in ids {
            if let Some(row) = inner.rows.get_mut(&(product, id.clone())) {
                row.deleted_at = Some(deleted_at);
            }
        }
        Ok(())
    }

    async fn update_category(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError> {
        let mut inner = self.inner.write();
        inner.calls.update_category += 1;
        for attachment in attachments {
            if let Some(row) = inner.rows.get_mut(&(product, attachment.id.clone())) {
                row.category = attachment.category.clone();
            }
        }
        Ok(())
    }

    async fn update_associations(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError> {
        let mut inner = self.inner.write();
        inner.calls.update_associations += 1;
        for attachment in attachments {
            if let Some(row) = inner.rows.get_mut(&(product, attachment.id.clone())) {
                row.show_nurse_review = attachment.show_nurse_review;
                row.tags = attachment.tags.clone();
            }
        }
        Ok(())
    }

    async fn has_assigned_cases(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<bool, VaultError> {
        Ok(self
            .inner
            .read()
            .assigned
            .contains(&(product, record_id.to_string())))
    }
}
