//! Process configuration
//!
//! Key material is read once at startup. Variables are looked up in the
//! process environment after loading an optional `.env` file:
//!
//! - `FLOW_SECRETS_KEY`: current key (32 bytes, base64 or 64 hex chars)
//! - `FLOW_SECRETS_NEXT_KEY`: optional rotated-in key, same encoding
//! - `DATABASE_URL`: PostgreSQL connection string
//!
//! A missing current key is not an error here; encryption reports it on
//! first use. A present but malformed key is rejected immediately.

use std::sync::Arc;

use tracing::{info, warn};

use crate::crypto::SecureKey;
use crate::error::{Result, VaultError};
use crate::key_ring::KeyRing;
use crate::secret_cipher::SecretCipher;

pub const ENV_KEY: &str = "FLOW_SECRETS_KEY";
pub const ENV_NEXT_KEY: &str = "FLOW_SECRETS_NEXT_KEY";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, Default)]
pub struct VaultConfig {
    pub key_ring: KeyRing,
    pub database_url: Option<String>,
}

impl VaultConfig {
    /// Load from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let current = read(ENV_KEY).map(|v| parse_key(ENV_KEY, &v)).transpose()?;
        let next = read(ENV_NEXT_KEY).map(|v| parse_key(ENV_NEXT_KEY, &v)).transpose()?;

        if current.is_none() {
            warn!("{} not set; writing secrets will fail until it is configured", ENV_KEY);
        }

        let key_ring = KeyRing::new(current, next);
        info!(keys = ?key_ring.describe(), "Loaded key ring");

        Ok(Self {
            key_ring,
            database_url: read(ENV_DATABASE_URL),
        })
    }

    pub fn cipher(&self) -> SecretCipher {
        SecretCipher::new(Arc::new(self.key_ring.clone()))
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| VaultError::Config(format!("{} not set", ENV_DATABASE_URL)))
    }
}

fn parse_key(name: &str, value: &str) -> Result<SecureKey> {
    SecureKey::from_encoded(value).map_err(|e| VaultError::Config(format!("{}: {}", name, e)))
}
