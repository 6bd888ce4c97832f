//! Credential Store
//!
//! Verifies and replaces salted password credentials. Reads go cache-aside:
//! the cache is checked first, a miss falls back to the durable store and
//! then populates the cache. Writes go to the durable store and invalidate
//! the cached copy. The durable store stays the source of truth; the cache
//! only ever changes latency.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::auth::errors::AuthError;
use crate::auth::password::{constant_time_eq, generate_salt, hash_password_blocking};
use crate::cache::CacheBackend;
use crate::database::{Credential, CredentialRepository, StoreError};

/// Salt used to burn the same hashing time when the account does not exist.
static DUMMY_SALT: LazyLock<Vec<u8>> = LazyLock::new(generate_salt);

#[derive(Clone)]
pub struct CredentialStore {
    repository: Arc<dyn CredentialRepository>,
    cache: Arc<dyn CacheBackend>,
    cache_ttl: Duration,
}

impl CredentialStore {
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        cache: Arc<dyn CacheBackend>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            cache_ttl,
        }
    }

    /// True iff `user_id` exists and `plaintext` matches. Never says which
    /// of the two failed.
    pub async fn verify_password(&self, user_id: &str, plaintext: &str) -> Result<bool, StoreError> {
        Ok(self.authenticate(user_id, plaintext).await?.is_some())
    }

    /// Like [`verify_password`](Self::verify_password) but hands back the
    /// matching credential.
    pub async fn authenticate(
        &self,
        user_id: &str,
        plaintext: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let Some(credential) = self.load(user_id).await? else {
            hash_password_blocking(plaintext, &DUMMY_SALT).await?;
            return Ok(None);
        };

        let candidate = hash_password_blocking(plaintext, &credential.salt).await?;
        if constant_time_eq(&candidate, &credential.password_hash) {
            Ok(Some(credential))
        } else {
            Ok(None)
        }
    }

    /// Rehash under a fresh salt, write through, invalidate the cache entry.
    pub async fn update_password(&self, user_id: &str, new_plaintext: &str) -> Result<(), AuthError> {
        if new_plaintext.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty"));
        }
        let current = self
            .repository
            .load_credential(user_id)
            .await?
            .ok_or(AuthError::UnknownAccount)?;

        let credential = build_credential(user_id, new_plaintext, current.roles).await?;
        self.repository.save_credential(&credential).await?;
        self.invalidate(user_id).await;

        tracing::info!(user_id, "password updated");
        Ok(())
    }

    /// Create a new credential. Fails if the account already exists.
    pub async fn register(
        &self,
        user_id: &str,
        plaintext: &str,
        roles: BTreeSet<String>,
    ) -> Result<Credential, AuthError> {
        if user_id.trim().is_empty() {
            return Err(AuthError::InvalidInput("user id must not be empty"));
        }
        if plaintext.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty"));
        }
        if self.repository.load_credential(user_id).await?.is_some() {
            return Err(AuthError::AccountExists);
        }

        let credential = build_credential(user_id, plaintext, roles).await?;
        // The check above only saves a hash; this insert decides the race.
        if !self.repository.create_credential(&credential).await? {
            return Err(AuthError::AccountExists);
        }
        self.invalidate(user_id).await;

        tracing::info!(user_id, roles = ?credential.roles, "✅ registered account");
        Ok(credential)
    }

    /// Remove the credential. Returns false if there was none.
    pub async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let removed = self.repository.delete_credential(user_id).await?;
        self.invalidate(user_id).await;
        Ok(removed)
    }

    /// Cache-aside read of the credential, without checking any password.
    pub async fn lookup(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        self.load(user_id).await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.repository.count_credentials().await
    }

    async fn load(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        let key = cache_key(user_id);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<Credential>(&cached) {
                Ok(credential) => return Ok(Some(credential)),
                Err(e) => tracing::warn!(user_id, "discarding unreadable cached credential: {}", e),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(user_id, "credential cache read failed: {}", e),
        }

        let Some(credential) = self.repository.load_credential(user_id).await? else {
            return Ok(None);
        };

        match serde_json::to_string(&credential) {
            Ok(encoded) => {
                if let Err(e) = self.cache.set(&key, encoded, self.cache_ttl).await {
                    tracing::warn!(user_id, "credential cache populate failed: {}", e);
                }
            }
            Err(e) => tracing::warn!(user_id, "credential not cacheable: {}", e),
        }
        Ok(Some(credential))
    }

    async fn invalidate(&self, user_id: &str) {
        if let Err(e) = self.cache.delete(&cache_key(user_id)).await {
            tracing::warn!(user_id, "credential cache invalidation failed: {}", e);
        }
    }
}

async fn build_credential(
    user_id: &str,
    plaintext: &str,
    roles: BTreeSet<String>,
) -> Result<Credential, StoreError> {
    let salt = generate_salt();
    let password_hash = hash_password_blocking(plaintext, &salt).await?;
    Ok(Credential {
        user_id: user_id.to_string(),
        password_hash,
        salt,
        roles,
    })
}

pub(crate) fn cache_key(user_id: &str) -> String {
    format!("credential:{user_id}")
}
