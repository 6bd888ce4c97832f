//! In-memory repositories, used for `STORE_BACKEND=memory` and in tests.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::database::models::{Credential, RefreshRecord};
use crate::database::{CredentialRepository, RefreshTokenRepository, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<String, Credential>>,
    refresh_tokens: RwLock<HashMap<String, RefreshRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryStore {
    async fn load_credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.read().get(user_id).cloned())
    }

    async fn create_credential(&self, credential: &Credential) -> Result<bool, StoreError> {
        match self.credentials.write().entry(credential.user_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(credential.clone());
                Ok(true)
            }
        }
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        self.credentials
            .write()
            .insert(credential.user_id.clone(), credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, user_id: &str) -> Result<bool, StoreError> {
        let removed = self.credentials.write().remove(user_id).is_some();
        if removed {
            self.refresh_tokens
                .write()
                .retain(|_, record| record.user_id != user_id);
        }
        Ok(removed)
    }

    async fn count_credentials(&self) -> Result<u64, StoreError> {
        Ok(self.credentials.read().len() as u64)
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn save_refresh(&self, record: &RefreshRecord) -> Result<(), StoreError> {
        self.refresh_tokens
            .write()
            .insert(record.token_id.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh(&self, token_id: &str) -> Result<Option<RefreshRecord>, StoreError> {
        Ok(self.refresh_tokens.read().get(token_id).cloned())
    }

    async fn revoke_refresh_if_active(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self.refresh_tokens.write();
        match records.get_mut(token_id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_for_user(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut revoked = 0;
        for record in self.refresh_tokens.write().values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                record.revoked_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(token_id: &str, user_id: &str) -> RefreshRecord {
        RefreshRecord {
            token_id: token_id.to_string(),
            user_id: user_id.to_string(),
            secret_hash: vec![1; 32],
            expires_at: Utc::now() + Duration::days(1),
            revoked: false,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_revoke_if_active_is_single_shot() {
        let store = MemoryStore::new();
        store.save_refresh(&record("t1", "u1")).await.unwrap();

        let now = Utc::now();
        assert!(store.revoke_refresh_if_active("t1", now).await.unwrap());
        assert!(!store.revoke_refresh_if_active("t1", now).await.unwrap());
        assert!(!store.revoke_refresh_if_active("missing", now).await.unwrap());

        let stored = store.find_refresh("t1").await.unwrap().unwrap();
        assert!(stored.revoked);
        assert_eq!(stored.revoked_at, Some(now));
    }

    #[tokio::test]
    async fn test_create_credential_never_replaces() {
        let store = MemoryStore::new();
        let first = Credential {
            user_id: "u1".to_string(),
            password_hash: vec![1; 32],
            salt: vec![2; 16],
            roles: Default::default(),
        };
        let second = Credential {
            password_hash: vec![3; 32],
            ..first.clone()
        };

        assert!(store.create_credential(&first).await.unwrap());
        assert!(!store.create_credential(&second).await.unwrap());
        assert_eq!(store.load_credential("u1").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let store = MemoryStore::new();
        store.save_refresh(&record("t1", "u1")).await.unwrap();
        store.save_refresh(&record("t2", "u1")).await.unwrap();
        store.save_refresh(&record("t3", "u2")).await.unwrap();

        assert_eq!(store.revoke_all_refresh_for_user("u1", Utc::now()).await.unwrap(), 2);
        assert!(!store.find_refresh("t3").await.unwrap().unwrap().revoked);
    }
}
