//! Format normalization.
//!
//! Every upload is turned into exactly one canonical PDF before it is sealed:
//!
//! - `pdf`: passed through unless it carries an embedded-files name tree, in
//!   which case every embedded PDF is opened and its pages are appended, in
//!   tree order, to one merged document
//! - `tif`/`tiff`: one page per frame, frame order preserved
//! - `jpg`/`jpeg`: a single full-page image
//! - `docx`/`doc`: rejected; callers convert to PDF before uploading
//! - anything else: rejected
//!
//! Converted output is a scratch file written beside the source as
//! `<file name>-as-pdf.pdf`, so `scan.tif` and `scan.jpg` never share one. It
//! is removed by [`CanonicalDocument::discard`] on both the success and
//! failure paths of the caller, and by the normalizer itself if conversion
//! fails half way.

mod binder;
mod raster;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::VaultError;

pub use binder::merge_documents;

/// Input format, decided by file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Tiff,
    Jpeg,
    WordDocument,
    Other(String),
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => SourceFormat::Pdf,
            "tif" | "tiff" => SourceFormat::Tiff,
            "jpg" | "jpeg" => SourceFormat::Jpeg,
            "docx" | "doc" => SourceFormat::WordDocument,
            _ => SourceFormat::Other(extension),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Pdf => f.write_str("pdf"),
            SourceFormat::Tiff => f.write_str("tiff"),
            SourceFormat::Jpeg => f.write_str("jpeg"),
            SourceFormat::WordDocument => f.write_str("word document"),
            SourceFormat::Other(ext) if ext.is_empty() => f.write_str("<no extension>"),
            SourceFormat::Other(ext) => f.write_str(ext),
        }
    }
}

/// The canonical PDF produced for one upload.
#[derive(Debug)]
#[must_use = "scratch output must be discarded once it has been sealed"]
pub struct CanonicalDocument {
    path: PathBuf,
    scratch: bool,
}

impl CanonicalDocument {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the document was converted into a scratch file rather than
    /// passed through.
    pub fn is_scratch(&self) -> bool {
        self.scratch
    }

    /// Delete the scratch output, if any. Failures are logged, not raised.
    pub fn discard(self) {
        if self.scratch {
            remove_scratch(&self.path);
        }
    }
}

/// Scratch output location for `source`.
pub fn scratch_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{}-as-pdf.pdf", name))
}

/// Produce the canonical PDF for `source`.
pub fn normalize(source: &Path) -> Result<CanonicalDocument, VaultError> {
    let display_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = SourceFormat::from_path(source);
    tracing::debug!(source = %source.display(), %format, "normalizing upload");

    let target = scratch_path(source);
    let converted = match format {
        SourceFormat::Pdf => match binder::flatten_binder(source, &target, &display_name) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(source = %source.display(), "no embedded files, passing PDF through");
                return Ok(CanonicalDocument {
                    path: source.to_path_buf(),
                    scratch: false,
                });
            }
            Err(e) => Err(e),
        },
        SourceFormat::Tiff => raster::tiff_to_pdf(source, &target, &display_name),
        SourceFormat::Jpeg => raster::jpeg_to_pdf(source, &target, &display_name),
        SourceFormat::WordDocument => {
            return Err(VaultError::UnsupportedFormat(format!(
                "{} (word documents must be converted to PDF before upload)",
                display_name
            )))
        }
        SourceFormat::Other(_) => {
            return Err(VaultError::UnsupportedFormat(display_name));
        }
    };

    match converted {
        Ok(()) => Ok(CanonicalDocument {
            path: target,
            scratch: true,
        }),
        Err(e) => {
            if target.exists() {
                remove_scratch(&target);
            }
            Err(e)
        }
    }
}

pub(crate) fn remove_scratch(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed scratch file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::fixtures;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a.PDF")), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_path(Path::new("a.tif")), SourceFormat::Tiff);
        assert_eq!(SourceFormat::from_path(Path::new("a.Jpeg")), SourceFormat::Jpeg);
        assert_eq!(
            SourceFormat::from_path(Path::new("a.docx")),
            SourceFormat::WordDocument
        );
        assert_eq!(
            SourceFormat::from_path(Path::new("a")),
            SourceFormat::Other(String::new())
        );
    }

    #[test]
    fn test_scratch_path_is_beside_source() {
        assert_eq!(
            scratch_path(Path::new("/tmp/up/scan.tif")),
            PathBuf::from("/tmp/up/scan.tif-as-pdf.pdf")
        );
    }

    #[test]
    fn test_plain_pdf_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plain.pdf");
        fixtures::write_pdf(&source, 2).unwrap();

        let canonical = normalize(&source).unwrap();
        assert!(!canonical.is_scratch());
        assert_eq!(canonical.path(), source.as_path());
        canonical.discard();
        assert!(source.exists());
    }

    #[test]
    fn test_unsupported_formats() {
        let dir = tempfile::tempdir().unwrap();
        let docx = dir.path().join("letter.docx");
        std::fs::write(&docx, b"PK").unwrap();
        let err = normalize(&docx).unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedFormat(ref m) if m.contains("converted")));

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, b"hello").unwrap();
        assert!(matches!(
            normalize(&txt).unwrap_err(),
            VaultError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_jpeg_becomes_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.jpg");
        fixtures::write_jpeg(&source, 40, 30).unwrap();

        let canonical = normalize(&source).unwrap();
        assert!(canonical.is_scratch());
        assert_eq!(fixtures::page_count(canonical.path(), "").unwrap(), 1);
        let scratch = canonical.path().to_path_buf();
        canonical.discard();
        assert!(!scratch.exists());
    }

    #[test]
    fn test_corrupt_tiff_leaves_no_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.tiff");
        std::fs::write(&source, b"II*\0garbage").unwrap();

        let err = normalize(&source).unwrap_err();
        assert!(matches!(err, VaultError::MalformedInput(_)));
        assert!(!scratch_path(&source).exists());
    }
}
