//! In-memory credential store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};

use kiro_types::{CredentialRecord, CredentialStore, StoreError, UserId};

/// Credential store kept in process memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: DashMap<UserId, CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) the credential of `user_id` and marks it active.
    pub fn save(&self, user_id: UserId, encrypted_token: String) -> CredentialRecord {
        // The entry guard holds the shard lock for the whole upsert.
        match self.records.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.encrypted_token = encrypted_token;
                record.is_active = true;
                record.updated_at = Utc::now();
                record.clone()
            }
            Entry::Vacant(entry) => entry
                .insert(CredentialRecord::new(user_id, encrypted_token))
                .clone(),
        }
    }

    /// Marks the credential inactive. Returns false when the user has none.
    pub fn deactivate(&self, user_id: UserId) -> bool {
        match self.records.get_mut(&user_id) {
            Some(mut record) => {
                record.is_active = false;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_by_user(&self, user_id: UserId) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.get(&user_id).map(|r| r.value().clone()))
    }
}
