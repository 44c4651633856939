//! PostgreSQL credential store adapter.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use kiro_types::{CredentialRecord, CredentialStore, StoreError, UserId};

use crate::types::PgCredentialRow;

/// PostgreSQL credential store implementation.
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    /// Connects and runs the schema migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        tracing::info!("Postgres credential store ready");
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the database schema.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let ddl = include_str!("../migrations/0001_create_plugin_api_keys_pg.sql");
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Stores (or replaces) the credential of `user_id` and marks it active.
    pub async fn save(
        &self,
        user_id: UserId,
        encrypted_token: &str,
    ) -> Result<CredentialRecord, StoreError> {
        let row: PgCredentialRow = sqlx::query_as(
            r#"INSERT INTO plugin_api_keys (user_id, api_key, is_active, created_at, updated_at)
               VALUES ($1, $2, TRUE, NOW(), NOW())
               ON CONFLICT (user_id) DO UPDATE SET
                   api_key = EXCLUDED.api_key,
                   is_active = TRUE,
                   updated_at = NOW()
               RETURNING user_id, api_key, is_active, created_at, updated_at"#,
        )
        .bind(user_id.as_i64())
        .bind(encrypted_token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.into_domain()
    }

    /// Marks the credential inactive. Returns false when the user has none.
    pub async fn deactivate(&self, user_id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE plugin_api_keys SET is_active = FALSE, updated_at = NOW() WHERE user_id = $1"#,
        )
        .bind(user_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn get_by_user(&self, user_id: UserId) -> Result<Option<CredentialRecord>, StoreError> {
        let row: Option<PgCredentialRow> = sqlx::query_as(
            r#"SELECT user_id, api_key, is_active, created_at, updated_at
               FROM plugin_api_keys WHERE user_id = $1"#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(PgCredentialRow::into_domain).transpose()
    }
}
