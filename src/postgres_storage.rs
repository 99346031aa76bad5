use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::model::{Header, Proxy, StoredBackendConfig};

/// PostgreSQL storage for backend config rows
///
/// - `auth` column only ever receives envelope strings
/// - one active config per flow is enforced by the
///   `backend_configs_one_active_per_flow` partial unique index, so a
///   conflicting write fails atomically inside the database
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to connect to PostgreSQL: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or upgrade the schema
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Insert a new row
    pub async fn insert(&self, row: &StoredBackendConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backend_configs (id, owner_id, flow_id, name, base_url, timeout_ms, retries,
                default_headers, auth_type, auth, compression, proxy, tls_skip_verify, is_active,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#
        )
        .bind(row.id)
        .bind(row.owner_id)
        .bind(row.flow_id)
        .bind(&row.name)
        .bind(&row.base_url)
        .bind(to_i64(row.timeout_ms, "timeout_ms")?)
        .bind(to_i32(row.retries, "retries")?)
        .bind(Json(&row.default_headers))
        .bind(row.auth_type.as_str())
        .bind(&row.auth)
        .bind(row.compression)
        .bind(row.proxy.as_ref().map(Json))
        .bind(row.tls_skip_verify)
        .bind(row.is_active)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::from_sqlx(e, row.flow_id))?;

        Ok(())
    }

    /// Replace every column of an existing row except `created_at`
    pub async fn update(&self, row: &StoredBackendConfig) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backend_configs
            SET owner_id = $2, flow_id = $3, name = $4, base_url = $5, timeout_ms = $6,
                retries = $7, default_headers = $8, auth_type = $9, auth = $10,
                compression = $11, proxy = $12, tls_skip_verify = $13, is_active = $14,
                updated_at = $15
            WHERE id = $1
            "#
        )
        .bind(row.id)
        .bind(row.owner_id)
        .bind(row.flow_id)
        .bind(&row.name)
        .bind(&row.base_url)
        .bind(to_i64(row.timeout_ms, "timeout_ms")?)
        .bind(to_i32(row.retries, "retries")?)
        .bind(Json(&row.default_headers))
        .bind(row.auth_type.as_str())
        .bind(&row.auth)
        .bind(row.compression)
        .bind(row.proxy.as_ref().map(Json))
        .bind(row.tls_skip_verify)
        .bind(row.is_active)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::from_sqlx(e, row.flow_id))?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound(row.id));
        }
        Ok(())
    }

    /// Flip only the active flag; the partial unique index decides conflicts
    pub async fn set_active(&self, id: &Uuid, flow_id: &Uuid, active: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE backend_configs
            SET is_active = $3, updated_at = now()
            WHERE id = $1 AND flow_id = $2
            "#
        )
        .bind(id)
        .bind(flow_id)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::from_sqlx(e, *flow_id))?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound(*id));
        }
        Ok(())
    }

    /// Swap `auth` only if it still holds `expected`; no other column is
    /// written. Returns false if the row is gone or its `auth` changed.
    pub async fn replace_auth(&self, id: &Uuid, expected: &str, auth: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE backend_configs
            SET auth = $3, updated_at = now()
            WHERE id = $1 AND auth = $2
            "#
        )
        .bind(id)
        .bind(expected)
        .bind(auth)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to replace backend config auth: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<StoredBackendConfig>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, flow_id, name, base_url, timeout_ms, retries, default_headers,
                auth_type, auth, compression, proxy, tls_skip_verify, is_active, created_at, updated_at
            FROM backend_configs
            WHERE id = $1
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to get backend config: {}", e)))?;

        row.as_ref().map(row_to_config).transpose()
    }

    pub async fn list_by_flow(&self, flow_id: &Uuid) -> Result<Vec<StoredBackendConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, flow_id, name, base_url, timeout_ms, retries, default_headers,
                auth_type, auth, compression, proxy, tls_skip_verify, is_active, created_at, updated_at
            FROM backend_configs
            WHERE flow_id = $1
            ORDER BY created_at
            "#
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to list backend configs: {}", e)))?;

        rows.iter().map(row_to_config).collect()
    }

    pub async fn get_active_for_flow(&self, flow_id: &Uuid) -> Result<Option<StoredBackendConfig>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, flow_id, name, base_url, timeout_ms, retries, default_headers,
                auth_type, auth, compression, proxy, tls_skip_verify, is_active, created_at, updated_at
            FROM backend_configs
            WHERE flow_id = $1 AND is_active = TRUE
            "#
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to get active backend config: {}", e)))?;

        row.as_ref().map(row_to_config).transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<StoredBackendConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, flow_id, name, base_url, timeout_ms, retries, default_headers,
                auth_type, auth, compression, proxy, tls_skip_verify, is_active, created_at, updated_at
            FROM backend_configs
            ORDER BY created_at
            "#
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Storage(format!("Failed to list backend configs: {}", e)))?;

        rows.iter().map(row_to_config).collect()
    }

    /// Delete a row. Returns true if it existed.
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backend_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Storage(format!("Failed to delete backend config: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_config(r: &PgRow) -> Result<StoredBackendConfig> {
    let timeout_ms: i64 = r.try_get("timeout_ms")?;
    let retries: i32 = r.try_get("retries")?;
    let auth_type: String = r.try_get("auth_type")?;
    let Json(default_headers): Json<Vec<Header>> = r.try_get("default_headers")?;
    let proxy: Option<Json<Proxy>> = r.try_get("proxy")?;

    Ok(StoredBackendConfig {
        id: r.try_get("id")?,
        owner_id: r.try_get("owner_id")?,
        flow_id: r.try_get("flow_id")?,
        name: r.try_get("name")?,
        base_url: r.try_get("base_url")?,
        timeout_ms: u64::try_from(timeout_ms)
            .map_err(|_| VaultError::Storage(format!("Negative timeout_ms: {}", timeout_ms)))?,
        retries: u32::try_from(retries)
            .map_err(|_| VaultError::Storage(format!("Negative retries: {}", retries)))?,
        default_headers,
        auth_type: auth_type.parse()?,
        auth: r.try_get("auth")?,
        compression: r.try_get("compression")?,
        proxy: proxy.map(|Json(p)| p),
        tls_skip_verify: r.try_get("tls_skip_verify")?,
        is_active: r.try_get("is_active")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn to_i64(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| VaultError::Storage(format!("{} out of range: {}", column, value)))
}

fn to_i32(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| VaultError::Storage(format!("{} out of range: {}", column, value)))
}
