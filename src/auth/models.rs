//! Authentication Models
//!
//! Data structures for authentication requests, responses, and the
//! authenticated subject handed to downstream handlers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::IssuedToken;

/// Role names the service grants and checks. Other roles may exist in the
/// store and are carried through tokens unchanged.
pub mod roles {
    pub const USER: &str = "user";
    pub const ADMIN: &str = "admin";
}

pub fn role_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|r| r.to_string()).collect()
}

/// Authenticated caller, extracted from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: String,
    pub roles: BTreeSet<String>,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Access token plus its rotating refresh token.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Token response after successful authentication
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: i64,
    pub refresh_expires_at: i64,
    pub user_id: String,
    pub roles: BTreeSet<String>,
}

impl From<&TokenPair> for TokenResponse {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access.encoded.clone(),
            refresh_token: pair.refresh.encoded.clone(),
            token_type: "Bearer".to_string(),
            expires_at: pair.access.token.expires_at.timestamp(),
            refresh_expires_at: pair.refresh.token.expires_at.timestamp(),
            user_id: pair.access.token.subject.clone(),
            roles: pair.access.token.roles.clone(),
        }
    }
}
