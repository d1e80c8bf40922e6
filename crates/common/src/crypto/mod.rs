//! Document encryption for the vault
//!
//! Sealed objects are ordinary PDFs protected with the standard security
//! handler, so any PDF reader can open an exported artifact given its
//! passphrase:
//!
//! - **Seal** (ingest): the canonical PDF is encrypted under the project
//!   passphrase.
//! - **Unseal-and-Reseal** (egress): a sealed object is fully decrypted into a
//!   transient file beside it, then sealed again under a per-request
//!   passphrase. The transient plaintext is always removed, and a failure to
//!   remove it is an error.
//!
//! # Access policy
//!
//! Every sealed document uses AES-256 (revision 6 key schedule) and grants no
//! permissions: printing, copying, modification and annotation are all denied.
//! The owner password is a random value that is never stored, so the vault
//! itself never opens a document in owner mode.
//!
//! Output is always written to a temporary file in the destination directory
//! and renamed into place, so a failure never leaves a partial document at
//! the destination.

mod document;
mod secret;

pub use document::{open_sealed, DocumentCipher};
pub use secret::Passphrase;
