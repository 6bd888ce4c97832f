//! Session Cache
//!
//! Revocation entries for access tokens that were logged out before their
//! natural expiry. Each entry lives exactly as long as the token it revokes
//! would have, so the cache never grows past the set of live tokens.
//!
//! A user-wide entry revokes every token of one user issued at or before a
//! cutoff. It lives for one access-token lifetime, after which every token
//! it covers has expired anyway.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::cache::{CacheBackend, CacheError};
use crate::clock::Clock;

#[derive(Clone)]
pub struct SessionCache {
    cache: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl SessionCache {
    pub fn new(cache: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Record `token_id` as revoked until `expires_at`. A token that has
    /// already expired needs no entry.
    pub async fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<(), CacheError> {
        let remaining = expires_at - self.clock.now();
        let Ok(ttl) = remaining.to_std() else {
            return Ok(());
        };
        if ttl.is_zero() {
            return Ok(());
        }

        self.cache
            .set(&revocation_key(token_id), expires_at.to_rfc3339(), ttl)
            .await?;
        tracing::debug!(token_id, ttl_secs = ttl.as_secs(), "token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, token_id: &str) -> Result<bool, CacheError> {
        Ok(self.cache.get(&revocation_key(token_id)).await?.is_some())
    }

    /// Revoke every token of `user_id` issued at or before now.
    /// `token_lifetime` is the longest lifetime such a token can have.
    pub async fn revoke_user(&self, user_id: &str, token_lifetime: Duration) -> Result<(), CacheError> {
        let Ok(ttl) = token_lifetime.to_std() else {
            return Ok(());
        };
        let cutoff = self.clock.now();
        self.cache
            .set(&user_key(user_id), cutoff.timestamp_micros().to_string(), ttl)
            .await?;
        tracing::debug!(user_id, %cutoff, "all tokens of user revoked");
        Ok(())
    }

    /// Whether a token of `user_id` issued at `issued_at` falls under a
    /// user-wide revocation.
    pub async fn is_user_revoked(&self, user_id: &str, issued_at: DateTime<Utc>) -> Result<bool, CacheError> {
        let Some(raw) = self.cache.get(&user_key(user_id)).await? else {
            return Ok(false);
        };
        let cutoff = raw
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_micros)
            .ok_or_else(|| CacheError::Unavailable(format!("unreadable revocation cutoff for {user_id}")))?;
        Ok(issued_at <= cutoff)
    }
}

fn revocation_key(token_id: &str) -> String {
    format!("revoked:{token_id}")
}

fn user_key(user_id: &str) -> String {
    format!("revoked-user:{user_id}")
}
