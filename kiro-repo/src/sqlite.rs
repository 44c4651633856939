//! SQLite credential store adapter.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use kiro_types::{CredentialRecord, CredentialStore, StoreError, UserId};

use crate::types::SqliteCredentialRow;

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Credential Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite credential store implementation.
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// Creates a new SQLite credential store with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            // Remove query parameters
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = if database_url.contains(":memory:") {
            // Every connection to `:memory:` opens a fresh database; pin one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePool::connect_with(options).await?
        };

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema (for testing with existing pool).
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let ddl = include_str!("../migrations/0001_create_plugin_api_keys.sql");
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
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO plugin_api_keys (user_id, api_key, is_active, created_at, updated_at)
               VALUES (?, ?, 1, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET
                   api_key = excluded.api_key,
                   is_active = 1,
                   updated_at = excluded.updated_at"#,
        )
        .bind(user_id.as_i64())
        .bind(encrypted_token)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.get_by_user(user_id)
            .await?
            .ok_or_else(|| StoreError::Database("credential vanished after upsert".into()))
    }

    /// Marks the credential inactive. Returns false when the user has none.
    pub async fn deactivate(&self, user_id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE plugin_api_keys SET is_active = 0, updated_at = ? WHERE user_id = ?"#,
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(user_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Port implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get_by_user(&self, user_id: UserId) -> Result<Option<CredentialRecord>, StoreError> {
        let row: Option<SqliteCredentialRow> = sqlx::query_as(
            r#"SELECT user_id, api_key, is_active, created_at, updated_at
               FROM plugin_api_keys WHERE user_id = ?"#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(SqliteCredentialRow::into_domain).transpose()
    }
}
