use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::{open_after_load, reseal_row, seal_for_write, Reseal};
use crate::model::BackendConfig;
use crate::postgres_storage::PostgresStorage;
use crate::repository::ResealReport;
use crate::secret_cipher::SecretCipher;

/// Backend config repository with PostgreSQL backend
///
/// Same contract as `BackendConfigRepository`: every write goes through
/// the pre-write hook and every load through the post-load hook.
pub struct PostgresConfigRepository {
    storage: PostgresStorage,
    cipher: SecretCipher,
}

impl PostgresConfigRepository {
    pub fn new(storage: PostgresStorage, cipher: SecretCipher) -> Self {
        Self { storage, cipher }
    }

    pub fn storage(&self) -> &PostgresStorage {
        &self.storage
    }

    pub async fn create(&self, record: &mut BackendConfig) -> Result<()> {
        let row = seal_for_write(record, &self.cipher)?;
        self.storage.insert(&row).await?;
        record.auth.mark_persisted(row.auth);
        info!(record_id = %record.id, flow_id = %record.flow, active = record.is_active, "Created backend config");
        Ok(())
    }

    pub async fn save(&self, record: &mut BackendConfig) -> Result<()> {
        let mut row = seal_for_write(record, &self.cipher)?;
        row.updated_at = Utc::now();
        self.storage.update(&row).await?;
        record.auth.mark_persisted(row.auth);
        record.updated_at = row.updated_at;
        Ok(())
    }

    pub async fn set_active(&self, record: &mut BackendConfig, active: bool) -> Result<()> {
        self.storage.set_active(&record.id, &record.flow, active).await?;
        record.is_active = active;
        info!(record_id = %record.id, flow_id = %record.flow, active, "Changed backend config activation");
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<BackendConfig>> {
        Ok(self
            .storage
            .get(id)
            .await?
            .map(|row| open_after_load(row, &self.cipher)))
    }

    pub async fn list_for_flow(&self, flow_id: &Uuid) -> Result<Vec<BackendConfig>> {
        Ok(self
            .storage
            .list_by_flow(flow_id)
            .await?
            .into_iter()
            .map(|row| open_after_load(row, &self.cipher))
            .collect())
    }

    pub async fn active_for_flow(&self, flow_id: &Uuid) -> Result<Option<BackendConfig>> {
        Ok(self
            .storage
            .get_active_for_flow(flow_id)
            .await?
            .map(|row| open_after_load(row, &self.cipher)))
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        self.storage.delete(id).await
    }

    /// Re-encrypt every row not yet under the current key, swapping only
    /// `auth` and only where it is unchanged since the snapshot
    pub async fn reseal_all(&self) -> Result<ResealReport> {
        let mut report = ResealReport::default();
        for row in self.storage.list_all().await? {
            match reseal_row(&row, &self.cipher)? {
                Reseal::Current => report.already_current += 1,
                Reseal::Unrecoverable => report.skipped += 1,
                Reseal::Rewrite(envelope) => {
                    if self.storage.replace_auth(&row.id, &row.auth, &envelope).await? {
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
}
