use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Trait for converting from tokio-postgres Row
pub trait FromRow {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error>
    where
        Self: Sized;
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Salted password credential. Replaced wholesale on password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    #[serde(with = "b64")]
    pub password_hash: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    pub roles: BTreeSet<String>,
}

impl FromRow for Credential {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        let roles: Vec<String> = row.try_get("roles")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            password_hash: row.try_get("password_hash")?,
            salt: row.try_get("salt")?,
            roles: roles.into_iter().collect(),
        })
    }
}

// ============================================================================
// REFRESH TOKENS
// ============================================================================

/// Persisted side of a refresh token. Only a hash of the token's secret is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRecord {
    pub token_id: String,
    pub user_id: String,
    pub secret_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl FromRow for RefreshRecord {
    fn from_row(row: &Row) -> Result<Self, tokio_postgres::Error> {
        Ok(Self {
            token_id: row.try_get("token_id")?,
            user_id: row.try_get("user_id")?,
            secret_hash: row.try_get("secret_hash")?,
            expires_at: row.try_get("expires_at")?,
            revoked: row.try_get("revoked")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

/// Byte fields as unpadded base64url strings in cached JSON.
mod b64 {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(s).map_err(D::Error::custom)
    }
}
