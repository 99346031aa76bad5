use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::{open_after_load, reseal_row, seal_for_write, Reseal};
use crate::model::{BackendConfig, StoredBackendConfig};
use crate::secret_cipher::SecretCipher;
use crate::storage::ConfigStorage;

/// Data-access layer for backend configs: the only way records move in
/// and out of storage, so `auth` is always encrypted on write and
/// decrypted on load.
pub struct BackendConfigRepository<S: ConfigStorage> {
    storage: Arc<S>,
    cipher: SecretCipher,
}

impl<S: ConfigStorage> BackendConfigRepository<S> {
    pub fn new(storage: Arc<S>, cipher: SecretCipher) -> Self {
        Self { storage, cipher }
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Persist a new record. On success `record.auth` is no longer
    /// considered modified.
    pub fn create(&self, record: &mut BackendConfig) -> Result<()> {
        let row = seal_for_write(record, &self.cipher)?;
        let stored = row.auth.clone();
        self.storage.insert(row)?;
        record.auth.mark_persisted(stored);
        info!(record_id = %record.id, flow_id = %record.flow, active = record.is_active, "Created backend config");
        Ok(())
    }

    /// Write back an existing record
    pub fn save(&self, record: &mut BackendConfig) -> Result<()> {
        let mut row = seal_for_write(record, &self.cipher)?;
        row.updated_at = Utc::now();
        let (stored, updated_at) = (row.auth.clone(), row.updated_at);
        self.storage.update(row)?;
        record.auth.mark_persisted(stored);
        record.updated_at = updated_at;
        Ok(())
    }

    /// Activate or deactivate a record. The storage engine rejects a second
    /// active record for the same flow.
    pub fn set_active(&self, record: &mut BackendConfig, active: bool) -> Result<()> {
        self.storage.set_active(&record.id, &record.flow, active)?;
        record.is_active = active;
        info!(record_id = %record.id, flow_id = %record.flow, active, "Changed backend config activation");
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Result<Option<BackendConfig>> {
        Ok(self.storage.get(id)?.map(|row| self.open(row)))
    }

    pub fn list_for_flow(&self, flow_id: &Uuid) -> Result<Vec<BackendConfig>> {
        Ok(self
            .storage
            .list_by_flow(flow_id)?
            .into_iter()
            .map(|row| self.open(row))
            .collect())
    }

    pub fn active_for_flow(&self, flow_id: &Uuid) -> Result<Option<BackendConfig>> {
        Ok(self
            .storage
            .list_by_flow(flow_id)?
            .into_iter()
            .find(|row| row.is_active)
            .map(|row| self.open(row)))
    }

    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        self.storage.delete(id)
    }

    /// Re-encrypt every record not yet under the current key. Only `auth`
    /// is written, and only where it is unchanged since the snapshot. Once
    /// this reports no skipped records the next key can be retired.
    pub fn reseal_all(&self) -> Result<ResealReport> {
        let mut report = ResealReport::default();
        for row in self.storage.list_all()? {
            match reseal_row(&row, &self.cipher)? {
                Reseal::Current => report.already_current += 1,
                Reseal::Unrecoverable => report.skipped += 1,
                Reseal::Rewrite(envelope) => {
                    if self.storage.replace_auth(&row.id, &row.auth, &envelope)? {
                        report.resealed += 1;
                    } else {
                        warn!(record_id = %row.id, "Backend config changed during reseal, leaving it alone");
                        report.skipped += 1;
                    }
                }
            }
        }
        info!(%report, "Reseal sweep finished");
        Ok(report)
    }

    fn open(&self, row: StoredBackendConfig) -> BackendConfig {
        open_after_load(row, &self.cipher)
    }
}

/// Outcome of a rotation sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResealReport {
    pub resealed: usize,
    pub already_current: usize,
    pub skipped: usize,
}

impl fmt::Display for ResealReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} resealed, {} already current, {} skipped",
            self.resealed, self.already_current, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    use crate::crypto::SecureKey;
    use crate::error::VaultError;
    use crate::key_ring::KeyRing;
    use crate::model::AuthType;
    use crate::secret_cipher::EMPTY_SECRET;
    use crate::storage::InMemoryStorage;

    fn repo_with(storage: &Arc<InMemoryStorage>, ring: KeyRing) -> BackendConfigRepository<InMemoryStorage> {
        BackendConfigRepository::new(Arc::clone(storage), SecretCipher::new(Arc::new(ring)))
    }

    fn auth(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn config(flow: Uuid, active: bool) -> BackendConfig {
        BackendConfig::new(Uuid::new_v4(), flow, "orders", "https://orders.local")
            .with_auth(AuthType::ApiKey, auth(json!({"header": "X-Api-Key", "key": "k-1"})))
            .active(active)
    }

    #[test]
    fn test_create_and_get() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::with_current(SecureKey::generate()));

        let mut record = config(Uuid::new_v4(), true);
        repo.create(&mut record).unwrap();
        assert!(!record.auth.is_modified());

        let stored = storage.get(&record.id).unwrap().unwrap();
        assert!(!stored.auth.contains("k-1"));

        let loaded = repo.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded.auth.get("key"), Some(&json!("k-1")));
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_create_without_key_writes_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::empty());

        let mut record = config(Uuid::new_v4(), false);
        assert!(matches!(
            repo.create(&mut record),
            Err(VaultError::EncryptionKeyNotConfigured)
        ));
        assert!(storage.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_uniqueness() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::with_current(SecureKey::generate()));
        let flow = Uuid::new_v4();

        repo.create(&mut config(flow, true)).unwrap();
        assert!(matches!(
            repo.create(&mut config(flow, true)),
            Err(VaultError::ActiveConfigConflict { .. })
        ));

        repo.create(&mut config(flow, false)).unwrap();
        repo.create(&mut config(flow, false)).unwrap();
        assert_eq!(repo.list_for_flow(&flow).unwrap().len(), 3);
        assert!(repo.active_for_flow(&flow).unwrap().is_some());
    }

    #[test]
    fn test_set_active_conflict_keeps_record_state() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::with_current(SecureKey::generate()));
        let flow = Uuid::new_v4();

        let mut first = config(flow, true);
        let mut second = config(flow, false);
        repo.create(&mut first).unwrap();
        repo.create(&mut second).unwrap();

        assert!(repo.set_active(&mut second, true).is_err());
        assert!(!second.is_active);

        repo.set_active(&mut first, false).unwrap();
        repo.set_active(&mut second, true).unwrap();
        assert_eq!(repo.active_for_flow(&flow).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_lifecycle_idempotence() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::with_current(SecureKey::generate()));

        let mut record = config(Uuid::new_v4(), false);
        let original = record.auth.values().clone();
        repo.create(&mut record).unwrap();
        let envelope = storage.get(&record.id).unwrap().unwrap().auth;

        let mut loaded = repo.get(&record.id).unwrap().unwrap();
        loaded.retries = 5;
        repo.save(&mut loaded).unwrap();
        assert_eq!(storage.get(&record.id).unwrap().unwrap().auth, envelope);

        let reloaded = repo.get(&record.id).unwrap().unwrap();
        assert_eq!(reloaded.auth.values(), &original);
        assert_eq!(reloaded.retries, 5);
    }

    #[test]
    fn test_corrupted_auth_loads_as_empty() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::with_current(SecureKey::generate()));

        let mut record = config(Uuid::new_v4(), false);
        repo.create(&mut record).unwrap();

        let mut row = storage.get(&record.id).unwrap().unwrap();
        row.auth = format!("{}.{}.00", "00".repeat(16), "00".repeat(16));
        storage.update(row).unwrap();

        let loaded = repo.get(&record.id).unwrap().unwrap();
        assert!(loaded.auth.is_empty());
        assert_eq!(loaded.name, "orders");
        assert_eq!(serde_json::to_string(loaded.auth.values()).unwrap(), EMPTY_SECRET);
    }

    #[test]
    fn test_rotation_end_to_end() {
        let storage = Arc::new(InMemoryStorage::new());
        let k0 = SecureKey::generate();
        let k1 = SecureKey::generate();
        let flow = Uuid::new_v4();

        let before = repo_with(&storage, KeyRing::with_current(k0.clone()));
        let mut a = config(flow, true);
        let mut b = config(flow, false);
        before.create(&mut a).unwrap();
        before.create(&mut b).unwrap();

        let rotated = repo_with(&storage, KeyRing::new(Some(k1.clone()), Some(k0)));
        assert_eq!(rotated.get(&a.id).unwrap().unwrap().auth.values(), a.auth.values());

        let report = rotated.reseal_all().unwrap();
        assert_eq!(
            report,
            ResealReport { resealed: 2, already_current: 0, skipped: 0 }
        );
        assert_eq!(rotated.reseal_all().unwrap().already_current, 2);

        let after = repo_with(&storage, KeyRing::with_current(k1));
        for id in [a.id, b.id] {
            let loaded = after.get(&id).unwrap().unwrap();
            assert_eq!(loaded.auth.get("key"), Some(&json!("k-1")));
        }
        assert!(after.active_for_flow(&flow).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_delete() {
        let storage = Arc::new(InMemoryStorage::new());
        let repo = repo_with(&storage, KeyRing::with_current(SecureKey::generate()));
        let mut record = config(Uuid::new_v4(), true);
        repo.create(&mut record).unwrap();

        assert!(repo.delete(&record.id).unwrap());
        assert!(repo.get(&record.id).unwrap().is_none());
        repo.create(&mut config(record.flow, true)).unwrap();
    }

    /// Storage that lets another writer act right after the sweep's snapshot
    struct InterleavedStorage {
        inner: InMemoryStorage,
        after_list: Box<dyn Fn(&InMemoryStorage) + Send + Sync>,
    }

    impl ConfigStorage for InterleavedStorage {
        fn insert(&self, row: StoredBackendConfig) -> Result<()> {
            self.inner.insert(row)
        }
        fn update(&self, row: StoredBackendConfig) -> Result<()> {
            self.inner.update(row)
        }
        fn set_active(&self, id: &Uuid, flow_id: &Uuid, active: bool) -> Result<()> {
            self.inner.set_active(id, flow_id, active)
        }
        fn replace_auth(&self, id: &Uuid, expected: &str, auth: &str) -> Result<bool> {
            self.inner.replace_auth(id, expected, auth)
        }
        fn get(&self, id: &Uuid) -> Result<Option<StoredBackendConfig>> {
            self.inner.get(id)
        }
        fn list_by_flow(&self, flow_id: &Uuid) -> Result<Vec<StoredBackendConfig>> {
            self.inner.list_by_flow(flow_id)
        }
        fn list_all(&self) -> Result<Vec<StoredBackendConfig>> {
            let rows = self.inner.list_all()?;
            (self.after_list)(&self.inner);
            Ok(rows)
        }
        fn delete(&self, id: &Uuid) -> Result<bool> {
            self.inner.delete(id)
        }
    }

    fn interleaved(
        inner: InMemoryStorage,
        after_list: impl Fn(&InMemoryStorage) + Send + Sync + 'static,
        ring: KeyRing,
    ) -> BackendConfigRepository<InterleavedStorage> {
        let storage = Arc::new(InterleavedStorage { inner, after_list: Box::new(after_list) });
        BackendConfigRepository::new(storage, SecretCipher::new(Arc::new(ring)))
    }

    #[test]
    fn test_reseal_does_not_undo_concurrent_writes() {
        let k0 = SecureKey::generate();
        let k1 = SecureKey::generate();
        let storage = Arc::new(InMemoryStorage::new());
        let before = repo_with(&storage, KeyRing::with_current(k0.clone()));

        let mut record = config(Uuid::new_v4(), true)
            .with_auth(AuthType::Bearer, auth(json!({"token": "old"})));
        before.create(&mut record).unwrap();

        // The concurrent writer deactivates the record and stores a new token
        let writer = repo_with(&Arc::new(InMemoryStorage::new()), KeyRing::with_current(k1.clone()));
        let mut edited = record.clone();
        edited.auth.insert("token", json!("new"));
        edited.is_active = false;
        let concurrent = seal_for_write(&edited, writer.cipher()).unwrap();

        let inner = InMemoryStorage::new();
        inner.insert(storage.get(&record.id).unwrap().unwrap()).unwrap();
        let rotated = interleaved(
            inner,
            move |s: &InMemoryStorage| s.update(concurrent.clone()).unwrap(),
            KeyRing::new(Some(k1), Some(k0)),
        );

        let report = rotated.reseal_all().unwrap();
        assert_eq!(report, ResealReport { resealed: 0, already_current: 0, skipped: 1 });

        let loaded = rotated.get(&record.id).unwrap().unwrap();
        assert!(!loaded.is_active);
        assert_eq!(loaded.auth.get("token"), Some(&json!("new")));
    }

    #[test]
    fn test_reseal_survives_row_deleted_after_snapshot() {
        let k0 = SecureKey::generate();
        let k1 = SecureKey::generate();
        let storage = Arc::new(InMemoryStorage::new());
        let before = repo_with(&storage, KeyRing::with_current(k0.clone()));

        let mut gone = config(Uuid::new_v4(), false);
        let mut kept = config(Uuid::new_v4(), false);
        before.create(&mut gone).unwrap();
        before.create(&mut kept).unwrap();

        let inner = InMemoryStorage::new();
        for id in [gone.id, kept.id] {
            inner.insert(storage.get(&id).unwrap().unwrap()).unwrap();
        }
        let gone_id = gone.id;
        let rotated = interleaved(
            inner,
            move |s: &InMemoryStorage| {
                s.delete(&gone_id).unwrap();
            },
            KeyRing::new(Some(k1.clone()), Some(k0)),
        );

        let report = rotated.reseal_all().unwrap();
        assert_eq!(report, ResealReport { resealed: 1, already_current: 0, skipped: 1 });
        assert!(rotated.get(&gone.id).unwrap().is_none());

        let only_k1 = SecretCipher::new(Arc::new(KeyRing::with_current(k1)));
        let row = rotated.storage.get(&kept.id).unwrap().unwrap();
        assert_eq!(open_after_load(row, &only_k1).auth.get("key"), Some(&json!("k-1")));
    }
}
