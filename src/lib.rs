pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod key_ring;
pub mod lifecycle;
pub mod model;
pub mod repository;
pub mod secret_cipher;
pub mod storage;

// PostgreSQL backend modules
pub mod postgres_repository;
pub mod postgres_storage;

pub use config::VaultConfig;
pub use crypto::{AesGcmCipher, EncryptedData, SecureKey, AES_256_KEY_SIZE, IV_SIZE, TAG_SIZE};
pub use error::{Result, VaultError};
pub use key_ring::{KeyEpoch, KeyRing};
pub use lifecycle::{open_after_load, seal_for_write, MalformedAuth};
pub use model::{AuthSecret, AuthType, BackendConfig, Header, Proxy, StoredBackendConfig};
pub use repository::{BackendConfigRepository, ResealReport};
pub use secret_cipher::{DecryptionFailed, Opened, SecretCipher, EMPTY_SECRET};
pub use storage::{ConfigStorage, InMemoryStorage};

// PostgreSQL exports
pub use postgres_repository::PostgresConfigRepository;
pub use postgres_storage::PostgresStorage;
