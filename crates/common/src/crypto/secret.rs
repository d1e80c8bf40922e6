//! Passphrases for sealed documents

use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated per-request passphrases
pub const GENERATED_LEN: usize = 32;

/// A document passphrase.
///
/// Surrounding whitespace is trimmed on construction, so a project secret read
/// from configuration with a trailing newline still opens the documents it
/// sealed. An empty passphrase is allowed, but a document sealed under it
/// opens in any reader without a password.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    /// Generate a random alphanumeric passphrase for one download.
    pub fn generate() -> Self {
        let value: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_LEN)
            .map(char::from)
            .collect();
        Self(value)
    }

    /// The passphrase itself. Never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Passphrase> for String {
    fn from(value: Passphrase) -> Self {
        value.0
    }
}
