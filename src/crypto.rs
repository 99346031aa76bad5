//! Cryptographic primitives for secret-at-rest encryption
//!
//! This module provides AES-256-GCM with a 128-bit IV and a detached
//! 128-bit authentication tag, plus the key wrapper used by the key ring.

use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit, OsRng},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// IV size in bytes (128 bits)
pub const IV_SIZE: usize = 16;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM keyed with a 16-byte IV
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A secure key wrapper that zeroizes memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey {
    bytes: [u8; AES_256_KEY_SIZE],
}

impl SecureKey {
    /// Create a new SecureKey from raw bytes (must be exactly 32 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != AES_256_KEY_SIZE {
            return Err(VaultError::Config(format!(
                "Invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; AES_256_KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Parse a key from its textual form: 64 hex characters or base64
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let mut decoded = if encoded.len() == AES_256_KEY_SIZE * 2
            && encoded.bytes().all(|b| b.is_ascii_hexdigit())
        {
            hex::decode(encoded)
                .map_err(|e| VaultError::Config(format!("Invalid hex key: {}", e)))?
        } else {
            STANDARD
                .decode(encoded)
                .map_err(|e| VaultError::Config(format!("Invalid base64 key: {}", e)))?
        };
        let key = Self::from_bytes(&decoded);
        decoded.zeroize();
        key
    }

    /// Generate a new random AES-256 key
    pub fn generate() -> Self {
        let mut key = [0u8; AES_256_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { bytes: key }
    }

    /// Get the key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Short non-secret identifier: first 8 hex chars of SHA-256(key)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..4])
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureKey({})", self.fingerprint())
    }
}

/// Output of one authenticated encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
    /// Ciphertext without the tag; same length as the plaintext
    pub ciphertext: Vec<u8>,
}

/// AES-256-GCM cipher wrapper
pub struct AesGcmCipher;

impl AesGcmCipher {
    /// Encrypt plaintext under `key` with a freshly drawn IV and no AAD
    pub fn encrypt(key: &SecureKey, plaintext: &[u8]) -> Result<EncryptedData> {
        let cipher = Aes256Gcm16::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Crypto(format!("Cipher init error: {}", e)))?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| VaultError::Crypto(format!("Encryption error: {}", e)))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(EncryptedData {
            iv,
            tag: tag_bytes,
            ciphertext: buffer,
        })
    }

    /// Decrypt and authenticate; fails on wrong key or any tampering
    pub fn decrypt(key: &SecureKey, encrypted: &EncryptedData) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm16::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Crypto(format!("Cipher init error: {}", e)))?;

        let mut buffer = encrypted.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&encrypted.iv),
                b"",
                &mut buffer,
                Tag::from_slice(&encrypted.tag),
            )
            .map_err(|_| VaultError::Crypto("Decryption failed: authentication error".into()))?;

        Ok(buffer)
    }
}
