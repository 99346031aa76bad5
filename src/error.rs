//! Error types for the config vault

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Name of the partial unique index guarding one active config per flow
pub const ACTIVE_CONFIG_INDEX: &str = "backend_configs_one_active_per_flow";

/// Errors surfaced to callers of the vault
#[derive(Error, Debug)]
pub enum VaultError {
    /// No current key is configured; writing a secret is impossible
    #[error("Encryption key not configured")]
    EncryptionKeyNotConfigured,

    /// A second active config was written for the same flow
    #[error("Flow {flow_id} already has an active backend config")]
    ActiveConfigConflict { flow_id: Uuid },

    /// Record not found in storage
    #[error("Backend config not found: {0}")]
    NotFound(Uuid),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Maps a database error to a vault error, recognising violations of the
    /// active-config index.
    pub fn from_sqlx(err: sqlx::Error, flow_id: Uuid) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() && db_err.constraint() == Some(ACTIVE_CONFIG_INDEX) {
                return VaultError::ActiveConfigConflict { flow_id };
            }
        }
        VaultError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(err: sqlx::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for VaultError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        VaultError::Storage(format!("Migration failed: {}", err))
    }
}
