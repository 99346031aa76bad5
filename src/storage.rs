//! Storage abstraction for backend config rows
//!
//! This module provides a trait-based storage interface that can be
//! implemented for various backends. Every implementation must enforce the
//! active-config invariant itself, atomically with the write: at most one
//! row per flow may have `is_active = true`.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::model::StoredBackendConfig;

/// Storage trait for backend config rows
pub trait ConfigStorage: Send + Sync {
    /// Insert a new row; fails with `ActiveConfigConflict` if it is active
    /// and its flow already has an active row
    fn insert(&self, row: StoredBackendConfig) -> Result<()>;

    /// Replace an existing row, same constraint as `insert`
    fn update(&self, row: StoredBackendConfig) -> Result<()>;

    /// Flip only the active flag of a row
    fn set_active(&self, id: &Uuid, flow_id: &Uuid, active: bool) -> Result<()>;

    /// Swap the `auth` column of a row if it still holds `expected`. No
    /// other column is written. Returns false if the row is gone or its
    /// `auth` changed.
    fn replace_auth(&self, id: &Uuid, expected: &str, auth: &str) -> Result<bool>;

    fn get(&self, id: &Uuid) -> Result<Option<StoredBackendConfig>>;

    fn list_by_flow(&self, flow_id: &Uuid) -> Result<Vec<StoredBackendConfig>>;

    fn list_all(&self) -> Result<Vec<StoredBackendConfig>>;

    /// Delete a row. Returns true if it existed.
    fn delete(&self, id: &Uuid) -> Result<bool>;
}

/// In-memory implementation of ConfigStorage
///
/// Suitable for development and testing. The constraint check and the
/// write happen under the same write lock.
pub struct InMemoryStorage {
    rows: RwLock<HashMap<Uuid, StoredBackendConfig>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Fails if activating `id` would give `flow_id` a second active row
fn check_active(
    rows: &HashMap<Uuid, StoredBackendConfig>,
    id: &Uuid,
    flow_id: &Uuid,
    active: bool,
) -> Result<()> {
    if !active {
        return Ok(());
    }
    let taken = rows
        .values()
        .any(|r| r.is_active && &r.flow_id == flow_id && &r.id != id);
    if taken {
        return Err(VaultError::ActiveConfigConflict { flow_id: *flow_id });
    }
    Ok(())
}

impl ConfigStorage for InMemoryStorage {
    fn insert(&self, row: StoredBackendConfig) -> Result<()> {
        let mut rows = self.rows.write();
        if rows.contains_key(&row.id) {
            return Err(VaultError::Storage(format!("Backend config {} already exists", row.id)));
        }
        check_active(&rows, &row.id, &row.flow_id, row.is_active)?;
        rows.insert(row.id, row);
        Ok(())
    }

    fn update(&self, row: StoredBackendConfig) -> Result<()> {
        let mut rows = self.rows.write();
        if !rows.contains_key(&row.id) {
            return Err(VaultError::NotFound(row.id));
        }
        check_active(&rows, &row.id, &row.flow_id, row.is_active)?;
        rows.insert(row.id, row);
        Ok(())
    }

    fn set_active(&self, id: &Uuid, flow_id: &Uuid, active: bool) -> Result<()> {
        let mut rows = self.rows.write();
        check_active(&rows, id, flow_id, active)?;
        match rows.get_mut(id) {
            Some(row) if &row.flow_id == flow_id => {
                row.is_active = active;
                row.updated_at = chrono::Utc::now();
                Ok(())
            }
            _ => Err(VaultError::NotFound(*id)),
        }
    }

    fn replace_auth(&self, id: &Uuid, expected: &str, auth: &str) -> Result<bool> {
        let mut rows = self.rows.write();
        match rows.get_mut(id) {
            Some(row) if row.auth == expected => {
                row.auth = auth.to_string();
                row.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, id: &Uuid) -> Result<Option<StoredBackendConfig>> {
        let rows = self.rows.read();
        Ok(rows.get(id).cloned())
    }

    fn list_by_flow(&self, flow_id: &Uuid) -> Result<Vec<StoredBackendConfig>> {
        let rows = self.rows.read();
        let mut filtered: Vec<_> = rows
            .values()
            .filter(|r| &r.flow_id == flow_id)
            .cloned()
            .collect();
        filtered.sort_by_key(|r| r.created_at);
        Ok(filtered)
    }

    fn list_all(&self) -> Result<Vec<StoredBackendConfig>> {
        let rows = self.rows.read();
        Ok(rows.values().cloned().collect())
    }

    fn delete(&self, id: &Uuid) -> Result<bool> {
        let mut rows = self.rows.write();
        Ok(rows.remove(id).is_some())
    }
}
