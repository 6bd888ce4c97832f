//! Auth Gateway
//!
//! Orchestrates login (credentials → codec), request authorization
//! (codec → session cache → role check), logout, and refresh-token rotation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use ring::digest::{SHA256, digest};
use tracing::{info, warn};

use crate::auth::errors::{AuthError, AuthenticationError, AuthorizationError};
use crate::auth::models::{Subject, TokenPair, role_set, roles};
use crate::auth::password::constant_time_eq;
use crate::auth::{CredentialStore, SessionCache, TokenCodec};
use crate::clock::Clock;
use crate::database::{RefreshRecord, RefreshTokenRepository, StoreError};

/// Token lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

pub struct AuthGateway {
    codec: TokenCodec,
    credentials: CredentialStore,
    sessions: SessionCache,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
}

impl AuthGateway {
    pub fn new(
        codec: TokenCodec,
        credentials: CredentialStore,
        sessions: SessionCache,
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
        clock: Arc<dyn Clock>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            codec,
            credentials,
            sessions,
            refresh_tokens,
            clock,
            settings,
        }
    }

    /// Check the password and issue a fresh token pair.
    pub async fn login(&self, user_id: &str, plaintext: &str) -> Result<TokenPair, AuthError> {
        let Some(credential) = self.credentials.authenticate(user_id, plaintext).await? else {
            warn!(user_id, "login rejected");
            return Err(AuthenticationError::InvalidCredentials.into());
        };

        let pair = self.issue_pair(&credential.user_id, &credential.roles).await?;
        info!(user_id, jti = %pair.access.token.token_id, "🔑 login succeeded");
        Ok(pair)
    }

    /// Verify `serialized`, reject it if revoked, and require `required_role`.
    pub async fn authorize(&self, serialized: &str, required_role: &str) -> Result<Subject, AuthError> {
        let token = self
            .codec
            .verify(serialized)
            .map_err(AuthorizationError::from)?;

        if self
            .sessions
            .is_revoked(&token.token_id)
            .await
            .map_err(StoreError::from)?
        {
            return Err(AuthorizationError::Revoked.into());
        }
        if self
            .sessions
            .is_user_revoked(&token.subject, token.issued_at)
            .await
            .map_err(StoreError::from)?
        {
            return Err(AuthorizationError::Revoked.into());
        }

        if !token.has_role(required_role) {
            return Err(AuthorizationError::Forbidden.into());
        }

        Ok(Subject {
            user_id: token.subject,
            roles: token.roles,
            token_id: token.token_id,
            expires_at: token.expires_at,
        })
    }

    /// Revoke an access token until it would have expired anyway.
    pub async fn logout(&self, serialized: &str) -> Result<(), AuthError> {
        let token = self
            .codec
            .verify(serialized)
            .map_err(AuthorizationError::from)?;

        self.sessions
            .revoke(&token.token_id, token.expires_at)
            .await
            .map_err(StoreError::from)?;

        info!(user_id = %token.subject, jti = %token.token_id, "👋 logged out");
        Ok(())
    }

    /// Exchange a refresh token for a new pair. Each refresh token works once;
    /// presenting a used one revokes every refresh token of its owner.
    pub async fn refresh(&self, serialized: &str) -> Result<TokenPair, AuthError> {
        let invalid = || AuthError::from(AuthenticationError::InvalidRefreshToken);

        let (token, secret) = self.codec.verify_refresh(serialized).map_err(|e| {
            warn!("refresh token rejected: {}", e);
            invalid()
        })?;

        let record = self
            .refresh_tokens
            .find_refresh(&token.token_id)
            .await?
            .ok_or_else(invalid)?;

        if record.user_id != token.subject || !constant_time_eq(&hash_secret(&secret), &record.secret_hash) {
            warn!(jti = %token.token_id, "refresh token does not match its record");
            return Err(invalid());
        }

        let now = self.clock.now();
        if record.revoked {
            let revoked = self
                .refresh_tokens
                .revoke_all_refresh_for_user(&record.user_id, now)
                .await?;
            warn!(
                user_id = %record.user_id,
                jti = %record.token_id,
                revoked,
                "⚠️  refresh token reuse detected, revoked all sessions"
            );
            return Err(invalid());
        }
        if record.expires_at <= now {
            return Err(invalid());
        }

        if !self
            .refresh_tokens
            .revoke_refresh_if_active(&record.token_id, now)
            .await?
        {
            // Lost a race against a concurrent refresh of the same token.
            return Err(invalid());
        }

        let Some(credential) = self.credentials.lookup(&record.user_id).await? else {
            return Err(invalid());
        };

        let pair = self.issue_pair(&credential.user_id, &credential.roles).await?;
        info!(user_id = %record.user_id, "🔄 refresh token rotated");
        Ok(pair)
    }

    /// Revoke a refresh token if it is valid. Returns whether anything changed.
    pub async fn revoke_refresh(&self, serialized: &str) -> Result<bool, AuthError> {
        let Ok((token, secret)) = self.codec.verify_refresh(serialized) else {
            return Ok(false);
        };
        let Some(record) = self.refresh_tokens.find_refresh(&token.token_id).await? else {
            return Ok(false);
        };
        if !constant_time_eq(&hash_secret(&secret), &record.secret_hash) {
            return Ok(false);
        }
        Ok(self
            .refresh_tokens
            .revoke_refresh_if_active(&record.token_id, self.clock.now())
            .await?)
    }

    /// Create an account with the default `user` role.
    pub async fn register(&self, user_id: &str, plaintext: &str) -> Result<(), AuthError> {
        self.credentials
            .register(user_id, plaintext, role_set(&[roles::USER]))
            .await?;
        Ok(())
    }

    /// Replace the password after re-checking the current one. Every token
    /// issued to the account so far stops working.
    pub async fn change_password(
        &self,
        user_id: &str,
        current: &str,
        new_plaintext: &str,
    ) -> Result<(), AuthError> {
        if !self.credentials.verify_password(user_id, current).await? {
            return Err(AuthenticationError::InvalidCredentials.into());
        }
        self.credentials.update_password(user_id, new_plaintext).await?;
        self.revoke_all_tokens(user_id).await?;
        Ok(())
    }

    /// Destroy the credential and every token of the account.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), AuthError> {
        self.revoke_all_tokens(user_id).await?;
        if !self.credentials.delete(user_id).await? {
            return Err(AuthError::UnknownAccount);
        }
        info!(user_id, "🗑️  account deleted");
        Ok(())
    }

    /// Create an administrator when no account exists yet. Returns whether
    /// one was created.
    pub async fn bootstrap_admin(&self, user_id: &str, password: Option<&str>) -> Result<bool, AuthError> {
        if self.credentials.count().await? > 0 {
            return Ok(false);
        }
        let Some(password) = password.filter(|p| !p.trim().is_empty()) else {
            warn!("Skipping admin bootstrap because no password was provided");
            return Ok(false);
        };

        self.credentials
            .register(user_id, password, role_set(&[roles::ADMIN, roles::USER]))
            .await?;
        info!("🔐 Bootstrap admin account '{}' created", user_id);
        warn!("⚠️  Change the bootstrap admin password immediately");
        Ok(true)
    }

    async fn revoke_all_tokens(&self, user_id: &str) -> Result<(), AuthError> {
        self.sessions
            .revoke_user(user_id, self.settings.access_ttl)
            .await
            .map_err(StoreError::from)?;
        let refresh = self
            .refresh_tokens
            .revoke_all_refresh_for_user(user_id, self.clock.now())
            .await?;
        info!(user_id, refresh, "⛔ revoked all tokens of user");
        Ok(())
    }

    async fn issue_pair(&self, user_id: &str, granted: &BTreeSet<String>) -> Result<TokenPair, AuthError> {
        let access = self.codec.issue(user_id, granted, self.settings.access_ttl)?;
        let (refresh, secret) = self.codec.issue_refresh(user_id, self.settings.refresh_ttl)?;

        self.refresh_tokens
            .save_refresh(&RefreshRecord {
                token_id: refresh.token.token_id.clone(),
                user_id: user_id.to_string(),
                secret_hash: hash_secret(&secret),
                expires_at: refresh.token.expires_at,
                revoked: false,
                revoked_at: None,
            })
            .await?;

        Ok(TokenPair { access, refresh })
    }
}

fn hash_secret(secret: &str) -> Vec<u8> {
    digest(&SHA256, secret.as_bytes()).as_ref().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::errors::InvalidTokenError;
    use crate::auth::jwt::SigningKey;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::database::MemoryStore;

    const SECRET: &str = "gateway-test-secret-0123456789abcdef";

    struct Harness {
        gateway: AuthGateway,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let store = Arc::new(MemoryStore::new());
        let key = Arc::new(SigningKey::from_secret(SECRET).unwrap());

        let gateway = AuthGateway::new(
            TokenCodec::new(key, "authgate-test", clock.clone()),
            CredentialStore::new(store.clone(), cache.clone(), std::time::Duration::from_secs(300)),
            SessionCache::new(cache, clock.clone()),
            store.clone(),
            clock.clone(),
            GatewaySettings {
                access_ttl: Duration::seconds(3600),
                refresh_ttl: Duration::days(14),
            },
        );
        Harness { gateway, clock, store }
    }

    fn authz(err: AuthError) -> AuthorizationError {
        match err {
            AuthError::Authorization(e) => e,
            other => panic!("expected authorization error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_authorize_logout_scenario() {
        let h = harness();
        h.gateway.register("u1", "correct horse").await.unwrap();

        let pair = h.gateway.login("u1", "correct horse").await.unwrap();
        let t = pair.access.encoded.as_str();

        let subject = h.gateway.authorize(t, roles::USER).await.unwrap();
        assert_eq!(subject.user_id, "u1");
        assert_eq!(subject.roles, role_set(&[roles::USER]));

        let err = h.gateway.authorize(t, roles::ADMIN).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::Forbidden);

        h.gateway.logout(t).await.unwrap();
        let err = h.gateway.authorize(t, roles::USER).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::Revoked);
    }

    #[tokio::test]
    async fn test_revoked_turns_into_invalid_after_expiry() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();
        let pair = h.gateway.login("u1", "pw").await.unwrap();
        let t = pair.access.encoded.as_str();

        h.gateway.logout(t).await.unwrap();
        h.clock.advance(Duration::seconds(3599));
        let err = h.gateway.authorize(t, roles::USER).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::Revoked);

        h.clock.advance(Duration::seconds(1));
        let err = h.gateway.authorize(t, roles::USER).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::TokenInvalid(InvalidTokenError::Expired));
    }

    #[tokio::test]
    async fn test_login_does_not_reveal_which_part_failed() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();

        let wrong_password = h.gateway.login("u1", "nope").await.unwrap_err();
        let unknown_user = h.gateway.login("ghost", "pw").await.unwrap_err();

        assert!(matches!(
            wrong_password,
            AuthError::Authentication(AuthenticationError::InvalidCredentials)
        ));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn test_logout_needs_a_valid_token() {
        let h = harness();
        let err = h.gateway.logout("not.a.token").await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::TokenInvalid(InvalidTokenError::Malformed));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_detects_reuse() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();
        let first = h.gateway.login("u1", "pw").await.unwrap();

        let second = h.gateway.refresh(&first.refresh.encoded).await.unwrap();
        assert_ne!(second.refresh.token.token_id, first.refresh.token.token_id);
        assert!(h.gateway.authorize(&second.access.encoded, roles::USER).await.is_ok());

        // Replaying the used token fails and burns the rotated one as well.
        let replay = h.gateway.refresh(&first.refresh.encoded).await.unwrap_err();
        assert!(matches!(
            replay,
            AuthError::Authentication(AuthenticationError::InvalidRefreshToken)
        ));
        let stored = h.store.find_refresh(&second.refresh.token.token_id).await.unwrap().unwrap();
        assert!(stored.revoked);
        assert!(h.gateway.refresh(&second.refresh.encoded).await.is_err());
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();
        let pair = h.gateway.login("u1", "pw").await.unwrap();

        assert!(h.gateway.refresh(&pair.access.encoded).await.is_err());
        let err = h.gateway.authorize(&pair.refresh.encoded, roles::USER).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::TokenInvalid(InvalidTokenError::Untrusted));
    }

    #[tokio::test]
    async fn test_revoke_refresh_on_logout() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();
        let pair = h.gateway.login("u1", "pw").await.unwrap();

        assert!(h.gateway.revoke_refresh(&pair.refresh.encoded).await.unwrap());
        assert!(!h.gateway.revoke_refresh(&pair.refresh.encoded).await.unwrap());
        assert!(!h.gateway.revoke_refresh("garbage").await.unwrap());
        assert!(h.gateway.refresh(&pair.refresh.encoded).await.is_err());
    }

    #[tokio::test]
    async fn test_change_password_revokes_all_tokens() {
        let h = harness();
        h.gateway.register("u1", "old-pw").await.unwrap();
        let pair = h.gateway.login("u1", "old-pw").await.unwrap();

        assert!(h.gateway.change_password("u1", "wrong", "new-pw").await.is_err());
        h.gateway.change_password("u1", "old-pw", "new-pw").await.unwrap();

        assert!(h.gateway.refresh(&pair.refresh.encoded).await.is_err());
        let err = h.gateway.authorize(&pair.access.encoded, roles::USER).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::Revoked);

        assert!(h.gateway.login("u1", "old-pw").await.is_err());
        h.clock.advance(Duration::milliseconds(1));
        let fresh = h.gateway.login("u1", "new-pw").await.unwrap();
        assert!(h.gateway.authorize(&fresh.access.encoded, roles::USER).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_account() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();
        let pair = h.gateway.login("u1", "pw").await.unwrap();

        h.gateway.delete_account("u1").await.unwrap();
        let err = h.gateway.authorize(&pair.access.encoded, roles::USER).await.unwrap_err();
        assert_eq!(authz(err), AuthorizationError::Revoked);
        assert!(h.gateway.login("u1", "pw").await.is_err());
        assert!(h.gateway.refresh(&pair.refresh.encoded).await.is_err());
        assert!(matches!(
            h.gateway.delete_account("u1").await,
            Err(AuthError::UnknownAccount)
        ));
    }

    #[tokio::test]
    async fn test_recreated_account_is_not_affected_by_old_revocation() {
        let h = harness();
        h.gateway.register("u1", "pw").await.unwrap();
        h.gateway.delete_account("u1").await.unwrap();

        h.clock.advance(Duration::seconds(1));
        h.gateway.register("u1", "pw2").await.unwrap();
        let pair = h.gateway.login("u1", "pw2").await.unwrap();
        assert!(h.gateway.authorize(&pair.access.encoded, roles::USER).await.is_ok());
    }

    #[tokio::test]
    async fn test_bootstrap_admin_only_on_empty_store() {
        let h = harness();
        assert!(!h.gateway.bootstrap_admin("admin", None).await.unwrap());
        assert!(!h.gateway.bootstrap_admin("admin", Some("  ")).await.unwrap());
        assert!(h.gateway.bootstrap_admin("admin", Some("change-me")).await.unwrap());
        assert!(!h.gateway.bootstrap_admin("admin2", Some("change-me")).await.unwrap());

        let pair = h.gateway.login("admin", "change-me").await.unwrap();
        assert!(h.gateway.authorize(&pair.access.encoded, roles::ADMIN).await.is_ok());
    }
}
