use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};
use lopdf::{Document, Object, StringFormat};
use rand::Rng;
use uuid::Uuid;

use super::secret::Passphrase;
use crate::error::VaultError;

/// Name of the crypt filter used for both strings and streams
const CRYPT_FILTER: &[u8] = b"StdCF";

/// Seals and reseals canonical PDFs under the project passphrase.
#[derive(Debug, Clone)]
pub struct DocumentCipher {
    project: Passphrase,
}

impl DocumentCipher {
    pub fn new(project: Passphrase) -> Self {
        Self { project }
    }

    /// Encrypt the plaintext PDF at `plaintext` under the project passphrase,
    /// writing the sealed document to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Crypto`] if the input cannot be parsed or
    /// encrypted, or if the output cannot be written. `dest` is untouched on
    /// failure.
    pub fn seal(&self, plaintext: &Path, dest: &Path) -> Result<(), VaultError> {
        seal_with(plaintext, dest, &self.project)
    }

    /// Decrypt the sealed document at `sealed` and seal it again under
    /// `passphrase`, writing the result to `dest`.
    ///
    /// The decrypted copy is written beside `sealed` as
    /// `<stem>-decrypted.pdf` and removed before returning, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Crypto`] if `sealed` does not open under the
    /// project passphrase, if resealing fails, or if the decrypted copy cannot
    /// be removed afterwards.
    pub fn reseal(
        &self,
        sealed: &Path,
        dest: &Path,
        passphrase: &Passphrase,
    ) -> Result<(), VaultError> {
        let transient = transient_path(sealed);
        let outcome = unseal_to(sealed, &transient, &self.project)
            .and_then(|()| seal_with(&transient, dest, passphrase));

        match fs::remove_file(&transient) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %transient.display(),
                    error = %e,
                    "failed to remove decrypted copy"
                );
                return Err(VaultError::Crypto(format!(
                    "failed to remove decrypted copy {}: {}",
                    transient.display(),
                    e
                )));
            }
        }

        outcome
    }
}

/// Open a sealed document with `passphrase`.
///
/// Loading already tries the empty user password, so a document sealed under
/// an empty passphrase opens without one.
///
/// # Errors
///
/// Returns [`VaultError::Crypto`] if the passphrase does not open the document.
pub fn open_sealed(path: &Path, passphrase: &Passphrase) -> Result<Document, VaultError> {
    let cannot_open = |e: lopdf::Error| VaultError::Crypto(format!("cannot open {}: {}", path.display(), e));

    let mut doc = Document::load(path).map_err(cannot_open)?;
    if doc.is_encrypted() {
        doc.decrypt(passphrase.expose()).map_err(cannot_open)?;
    }
    Ok(doc)
}

fn transient_path(sealed: &Path) -> PathBuf {
    let stem = sealed
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sealed.with_file_name(format!("{}-decrypted.pdf", stem))
}

fn seal_with(plaintext: &Path, dest: &Path, passphrase: &Passphrase) -> Result<(), VaultError> {
    let doc = Document::load(plaintext)
        .map_err(|e| VaultError::Crypto(format!("cannot read {}: {}", plaintext.display(), e)))?;
    let mut doc = without_encryption(doc);
    encrypt(&mut doc, passphrase)?;
    write_atomically(&mut doc, dest)
}

fn unseal_to(sealed: &Path, dest: &Path, passphrase: &Passphrase) -> Result<(), VaultError> {
    let doc = open_sealed(sealed, passphrase)?;
    let mut doc = without_encryption(doc);
    write_atomically(&mut doc, dest)
}

/// Copy of `doc` that is saved as plaintext: the encryption dictionary is
/// dropped from both the trailer and the object table.
fn without_encryption(doc: Document) -> Document {
    let encrypt_id = doc
        .trailer
        .get(b"Encrypt")
        .and_then(Object::as_reference)
        .ok();

    let mut plain = Document::with_version(doc.version);
    plain.objects = doc.objects;
    plain.max_id = doc.max_id;
    plain.trailer = doc.trailer;
    plain.trailer.remove(b"Encrypt");
    if let Some(id) = encrypt_id {
        plain.objects.remove(&id);
    }
    plain
}

fn encrypt(doc: &mut Document, passphrase: &Passphrase) -> Result<(), VaultError> {
    let mut rng = rand::rng();

    // the key derivation needs a file identifier
    if doc.trailer.get(b"ID").is_err() {
        let mut id = [0u8; 16];
        rng.fill(&mut id);
        let id = Object::String(id.to_vec(), StringFormat::Hexadecimal);
        doc.trailer.set("ID", vec![id.clone(), id]);
    }

    let mut file_key = [0u8; 32];
    rng.fill(&mut file_key);
    let owner_password = Uuid::new_v4().to_string();

    let filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
    let version = EncryptionVersion::V5 {
        encrypt_metadata: true,
        crypt_filters: BTreeMap::from([(CRYPT_FILTER.to_vec(), filter)]),
        file_encryption_key: &file_key,
        stream_filter: CRYPT_FILTER.to_vec(),
        string_filter: CRYPT_FILTER.to_vec(),
        owner_password: &owner_password,
        user_password: passphrase.expose(),
        permissions: Permissions::empty(),
    };

    let state = EncryptionState::try_from(version)
        .map_err(|e| VaultError::Crypto(format!("cannot derive encryption keys: {}", e)))?;
    doc.encrypt(&state)
        .map_err(|e| VaultError::Crypto(format!("cannot encrypt document: {}", e)))
}

fn write_atomically(doc: &mut Document, dest: &Path) -> Result<(), VaultError> {
    let write_failed =
        |e: &dyn std::fmt::Display| VaultError::Crypto(format!("cannot write {}: {}", dest.display(), e));

    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| write_failed(&e))?;

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_failed(&e))?;
    {
        let mut writer = BufWriter::new(staged.as_file_mut());
        doc.save_to(&mut writer).map_err(|e| write_failed(&e))?;
        writer.flush().map_err(|e| write_failed(&e))?;
    }
    staged
        .as_file()
        .sync_all()
        .map_err(|e| write_failed(&e))?;
    staged.persist(dest).map_err(|e| write_failed(&e.error))?;
    Ok(())
}
