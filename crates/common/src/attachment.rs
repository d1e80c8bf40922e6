//! Record files and the keys they are stored under.
//!
//! A sealed object lives at `<productLine>/<recordId>/<attachmentId>/data`. The
//! leaf is always literally `data`; the original file name and extension only
//! survive in persistence metadata. Existing stored data depends on this layout
//! being bit-exact.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Leaf file name of every sealed object.
pub const DATA_FILE_NAME: &str = "data";

/// Characters that never make it into a stored file name.
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Product line a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductLine {
    /// Global trigger tool
    Gtt,
    /// Standard of care
    Soc,
    /// Medical necessity
    Mn,
    /// Managed care support contractor
    Mcsc,
    /// Designated provider
    Dp,
}

impl ProductLine {
    pub const ALL: [ProductLine; 5] = [
        ProductLine::Gtt,
        ProductLine::Soc,
        ProductLine::Mn,
        ProductLine::Mcsc,
        ProductLine::Dp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductLine::Gtt => "gtt",
            ProductLine::Soc => "soc",
            ProductLine::Mn => "mn",
            ProductLine::Mcsc => "mcsc",
            ProductLine::Dp => "dp",
        }
    }

    /// Whether attachments on this product line are associated with individual
    /// cases and carry a nurse-review visibility flag.
    pub fn tracks_case_associations(&self) -> bool {
        matches!(self, ProductLine::Soc)
    }
}

impl fmt::Display for ProductLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductLine {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ProductLine::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| VaultError::bad_request(format!("Invalid product line: {}", s)))
    }
}

/// A stored record file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "record_file_id")]
    pub id: String,
    pub record_id: String,
    pub file_name: String,
    pub category: String,
    /// Case-association tags (specialty ids); only meaningful on product
    /// lines that track case associations
    #[serde(rename = "specialties", default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub show_nurse_review: Option<bool>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Attachment {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }
}

/// One entry of the desired attachment set handed to the reconciler.
///
/// Entries without an id are new uploads; entries with an id refer to an
/// attachment that is already stored on the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    #[serde(rename = "record_file_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub show_nurse_review: Option<bool>,
    #[serde(rename = "specialties", default)]
    pub tags: Vec<String>,
}

impl AttachmentDescriptor {
    /// Descriptor for a new upload.
    pub fn new_upload(file_name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            category: Some(category.into()),
            ..Default::default()
        }
    }

    /// Descriptor keeping a stored attachment as it is.
    pub fn keep(attachment: &Attachment) -> Self {
        Self {
            id: Some(attachment.id.clone()),
            file_name: Some(attachment.file_name.clone()),
            category: Some(attachment.category.clone()),
            show_nurse_review: attachment.show_nurse_review,
            tags: attachment.tags.clone(),
        }
    }

    pub fn with_visibility(mut self, show_nurse_review: bool, tags: &[&str]) -> Self {
        self.show_nurse_review = Some(show_nurse_review);
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// The id, if it is present and not blank.
    pub fn existing_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

/// Strip control characters and `< > : " / \ | ? *` from a file name and trim
/// it. Returns `None` when nothing usable is left.
pub fn normalize_file_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !FORBIDDEN_NAME_CHARS.contains(c))
        .collect();
    let cleaned = cleaned.trim();
    match cleaned {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_NAME_CHARS.contains(&c))
}

/// Deterministic location of one attachment's sealed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    product_line: ProductLine,
    record_id: String,
    attachment_id: String,
}

impl StorageKey {
    /// Build a key, refusing ids that would escape their directory.
    pub fn new(
        product_line: ProductLine,
        record_id: impl Into<String>,
        attachment_id: impl Into<String>,
    ) -> Result<Self, VaultError> {
        let record_id = record_id.into();
        let attachment_id = attachment_id.into();
        if !is_path_segment(&record_id) {
            return Err(VaultError::bad_request(format!(
                "Invalid record id: {:?}",
                record_id
            )));
        }
        if !is_path_segment(&attachment_id) {
            return Err(VaultError::bad_request(format!(
                "Invalid attachment id: {:?}",
                attachment_id
            )));
        }
        Ok(Self {
            product_line,
            record_id,
            attachment_id,
        })
    }

    pub fn product_line(&self) -> ProductLine {
        self.product_line
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn attachment_id(&self) -> &str {
        &self.attachment_id
    }

    /// `<productLine>/<recordId>`
    pub fn record_dir(&self) -> String {
        record_dir(self.product_line, &self.record_id)
    }

    /// `<productLine>/<recordId>/<attachmentId>`
    pub fn attachment_dir(&self) -> String {
        format!("{}/{}", self.record_dir(), self.attachment_id)
    }
}

/// `<productLine>/<recordId>`, the unit of cluster propagation.
pub fn record_dir(product_line: ProductLine, record_id: &str) -> String {
    format!("{}/{}", product_line, record_id)
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.attachment_dir(), DATA_FILE_NAME)
    }
}
