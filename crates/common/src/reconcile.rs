//! Desired-versus-current diff of a record's attachments.
//!
//! [`partition`] turns the caller's desired attachment list into disjoint
//! add / update / delete sets and validates each descriptor on the way. The
//! checks that need the whole batch ([`Partition::check_duplicate_names`]) or
//! the persistence layer (the assigned-case check in
//! [`Vault::reconcile`](crate::vault::Vault::reconcile)) run before anything
//! is written.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use uuid::Uuid;

use crate::attachment::{normalize_file_name, Attachment, AttachmentDescriptor, ProductLine};
use crate::error::VaultError;

pub const MISSING_CATEGORY: &str = "File is missing category";
pub const EMPTY_FILE_NAME: &str = "Empty fileName given";
pub const INVALID_VISIBILITY: &str = "One or more files have invalid parameters";
pub const UNKNOWN_FILE: &str = "Given file not found on record";
pub const DUPLICATE_NAME: &str = "Multiple files with the same name cannot be uploaded";
pub const LAST_FILE_OF_ASSIGNED_RECORD: &str =
    "At least one file should remain while record is assigned";

/// Result of diffing a desired attachment list against the stored one.
///
/// Every stored attachment lands in exactly one of `to_delete`, `unchanged`
/// or the update lists; an attachment whose category and associations both
/// changed appears in both update lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// New attachments with freshly generated ids and normalized names
    pub to_add: Vec<Attachment>,
    /// Stored attachments carrying their new category
    pub to_update_category: Vec<Attachment>,
    /// Stored attachments carrying their new visibility flag and tags
    pub to_update_associations: Vec<Attachment>,
    pub unchanged: Vec<Attachment>,
    pub to_delete: Vec<Attachment>,
}

impl Partition {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty()
            && self.to_update_category.is_empty()
            && self.to_update_associations.is_empty()
            && self.to_delete.is_empty()
    }

    /// Reject a batch that adds the same name twice, or adds a name that a
    /// kept attachment already uses. Names compare case-sensitively.
    pub fn check_duplicate_names(&self, current: &[Attachment]) -> Result<(), VaultError> {
        let deleted: HashSet<&str> = self.to_delete.iter().map(|a| a.id.as_str()).collect();
        let kept: HashSet<&str> = current
            .iter()
            .filter(|a| a.is_active() && !deleted.contains(a.id.as_str()))
            .map(|a| a.file_name.as_str())
            .collect();

        let mut incoming = HashSet::new();
        for attachment in &self.to_add {
            let name = attachment.file_name.as_str();
            if !incoming.insert(name) || kept.contains(name) {
                return Err(VaultError::bad_request(format!("{}: {}", DUPLICATE_NAME, name)));
            }
        }
        Ok(())
    }

    /// Number of active attachments once the batch is applied.
    pub fn remaining(&self, current: &[Attachment]) -> usize {
        let active = current.iter().filter(|a| a.is_active()).count();
        active - self.to_delete.len() + self.to_add.len()
    }
}

/// Diff `desired` against the stored attachments of a record.
///
/// # Errors
///
/// - `BadRequest` when a descriptor has no category, a new upload's name is
///   blank after normalization, a stored id is referenced twice, or (on
///   product lines tracking case associations) the visibility flag is unset
///   or false without any tag
/// - `NotFound` when a descriptor references an id that is not stored on the
///   record
pub fn partition(
    product: ProductLine,
    record_id: &str,
    desired: &[AttachmentDescriptor],
    current: &[Attachment],
) -> Result<Partition, VaultError> {
    let tracks_cases = product.tracks_case_associations();
    let mut stored: BTreeMap<&str, &Attachment> = current
        .iter()
        .filter(|a| a.is_active())
        .map(|a| (a.id.as_str(), a))
        .collect();
    let mut referenced: HashSet<String> = HashSet::new();
    let mut partition = Partition::default();

    for descriptor in desired {
        let category = descriptor
            .category
            .clone()
            .ok_or_else(|| VaultError::bad_request(MISSING_CATEGORY))?;
        if tracks_cases {
            check_visibility(descriptor)?;
        }

        let Some(id) = descriptor.existing_id() else {
            let file_name = descriptor
                .file_name
                .as_deref()
                .and_then(normalize_file_name)
                .ok_or_else(|| VaultError::bad_request(EMPTY_FILE_NAME))?;
            partition.to_add.push(Attachment {
                id: Uuid::new_v4().to_string(),
                record_id: record_id.to_string(),
                file_name,
                category,
                tags: if tracks_cases {
                    descriptor.tags.clone()
                } else {
                    Vec::new()
                },
                show_nurse_review: descriptor.show_nurse_review.filter(|_| tracks_cases),
                deleted_at: None,
            });
            continue;
        };

        let Some(existing) = stored.remove(id) else {
            if referenced.contains(id) {
                return Err(VaultError::bad_request(format!(
                    "File referenced more than once: {}",
                    id
                )));
            }
            return Err(VaultError::not_found(UNKNOWN_FILE));
        };
        referenced.insert(id.to_string());

        let mut updated = existing.clone();
        updated.category = category;
        let category_changed = updated.category != existing.category;

        let mut associations_changed = false;
        if tracks_cases {
            let desired_tags: BTreeSet<&str> = descriptor.tags.iter().map(String::as_str).collect();
            associations_changed = existing.show_nurse_review != descriptor.show_nurse_review
                || existing.tag_set() != desired_tags;
            updated.show_nurse_review = descriptor.show_nurse_review;
            updated.tags = descriptor.tags.clone();
        }

        match (category_changed, associations_changed) {
            (false, false) => partition.unchanged.push(updated),
            (true, false) => partition.to_update_category.push(updated),
            (false, true) => partition.to_update_associations.push(updated),
            (true, true) => {
                partition.to_update_category.push(updated.clone());
                partition.to_update_associations.push(updated);
            }
        }
    }

    partition.to_delete = stored.into_values().cloned().collect();
    Ok(partition)
}

fn check_visibility(descriptor: &AttachmentDescriptor) -> Result<(), VaultError> {
    match descriptor.show_nurse_review {
        None => Err(VaultError::bad_request(INVALID_VISIBILITY)),
        Some(false) if descriptor.tags.is_empty() => Err(VaultError::bad_request(INVALID_VISIBILITY)),
        Some(_) => Ok(()),
    }
}
