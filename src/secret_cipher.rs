//! The only component that sees plaintext secrets.
//!
//! `encrypt` always uses the current key. `decrypt` never fails: anything
//! that cannot be opened by a key in the ring comes back as the literal
//! `{}`, so a corrupted secret can never abort loading its record.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::AesGcmCipher;
use crate::envelope::{self, EnvelopeParseError, Parsed};
use crate::error::{Result, VaultError};
use crate::key_ring::{KeyEpoch, KeyRing};

/// Substituted for any value that cannot be decrypted
pub const EMPTY_SECRET: &str = "{}";

/// Why an envelope could not be opened. Never propagated past the
/// lifecycle hooks; always replaced by an empty secret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionFailed {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] EnvelopeParseError),

    #[error("no key authenticated the envelope (tried: {})", .tried.join(", "))]
    NoMatchingKey { tried: Vec<String> },

    #[error("plaintext opened with {epoch} key is not valid UTF-8")]
    InvalidUtf8 { epoch: KeyEpoch },
}

/// Successfully recovered plaintext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub plaintext: String,
    /// `None` when the stored value was passthrough plaintext
    pub epoch: Option<KeyEpoch>,
}

#[derive(Debug, Clone)]
pub struct SecretCipher {
    keys: Arc<KeyRing>,
}

impl SecretCipher {
    pub fn new(keys: Arc<KeyRing>) -> Self {
        Self { keys }
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.keys
    }

    /// Encrypt under the current key with a fresh IV
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = self
            .keys
            .current_key()
            .ok_or(VaultError::EncryptionKeyNotConfigured)?;
        let encrypted = AesGcmCipher::encrypt(key, plaintext.as_bytes())?;
        Ok(envelope::serialize(&encrypted))
    }

    /// Decrypt, degrading to `{}` on any failure
    pub fn decrypt(&self, stored: &str) -> String {
        match self.try_decrypt(stored) {
            Ok(opened) => opened.plaintext,
            Err(err) => {
                warn!(error = %err, "Secret decryption failed, substituting empty secret");
                EMPTY_SECRET.to_string()
            }
        }
    }

    /// Decrypt, reporting which key opened the envelope or why none did
    pub fn try_decrypt(&self, stored: &str) -> std::result::Result<Opened, DecryptionFailed> {
        let encrypted = match envelope::parse(stored)? {
            Parsed::Passthrough(plain) => {
                return Ok(Opened {
                    plaintext: plain.to_string(),
                    epoch: None,
                })
            }
            Parsed::Sealed(encrypted) => encrypted,
        };

        let mut tried = Vec::new();
        for (epoch, key) in self.keys.keys_in_trial_order() {
            match AesGcmCipher::decrypt(key, &encrypted) {
                Ok(bytes) => {
                    if epoch == KeyEpoch::Next {
                        debug!(fingerprint = %key.fingerprint(), "Envelope opened with next key");
                    }
                    let plaintext = String::from_utf8(bytes)
                        .map_err(|_| DecryptionFailed::InvalidUtf8 { epoch })?;
                    return Ok(Opened {
                        plaintext,
                        epoch: Some(epoch),
                    });
                }
                Err(_) => tried.push(format!("{}:{}", epoch, key.fingerprint())),
            }
        }

        Err(DecryptionFailed::NoMatchingKey { tried })
    }
}
