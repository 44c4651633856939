//! Credential store port.
//!
//! Adapters (SQLite, Postgres, in-memory) implement this trait. The proxy only
//! ever reads through it.

use std::sync::Arc;

use crate::domain::{CredentialRecord, UserId};

/// Error type for credential store lookups.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt credential record: {0}")]
    Corrupt(String),
}

/// Read access to stored plugin API credentials.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Returns the credential record of `user_id`, active or not.
    async fn get_by_user(&self, user_id: UserId) -> Result<Option<CredentialRecord>, StoreError>;
}

#[async_trait::async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn get_by_user(&self, user_id: UserId) -> Result<Option<CredentialRecord>, StoreError> {
        (**self).get_by_user(user_id).await
    }
}
