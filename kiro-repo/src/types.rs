//! Database row types for the SQL credential stores.

use sqlx::FromRow;

use kiro_types::{CredentialRecord, StoreError, UserId};

/// `plugin_api_keys` row as SQLite returns it (timestamps stored as RFC 3339 text).
#[cfg(feature = "sqlite")]
#[derive(FromRow)]
pub struct SqliteCredentialRow {
    pub user_id: i64,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(feature = "sqlite")]
impl SqliteCredentialRow {
    pub fn into_domain(self) -> Result<CredentialRecord, StoreError> {
        Ok(CredentialRecord {
            user_id: UserId::new(self.user_id),
            encrypted_token: self.api_key,
            is_active: self.is_active,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

#[cfg(feature = "sqlite")]
fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

/// `plugin_api_keys` row as Postgres returns it.
#[cfg(feature = "postgres")]
#[derive(FromRow)]
pub struct PgCredentialRow {
    pub user_id: i64,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(feature = "postgres")]
impl PgCredentialRow {
    pub fn into_domain(self) -> Result<CredentialRecord, StoreError> {
        Ok(CredentialRecord {
            user_id: UserId::new(self.user_id),
            encrypted_token: self.api_key,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
