//! Password hashing primitives.
//!
//! Credentials are stored as a raw Argon2id output plus its salt, and
//! compared with an explicit constant-time primitive.

use argon2::Argon2;
use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;

use crate::database::StoreError;

pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;

/// Fresh random salt.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Argon2id (default parameters) of `plaintext` under `salt`.
pub fn hash_password(plaintext: &str, salt: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut out = vec![0u8; HASH_LEN];
    Argon2::default()
        .hash_password_into(plaintext.as_bytes(), salt, &mut out)
        .map_err(|e| StoreError::Hashing(e.to_string()))?;
    Ok(out)
}

/// Same as [`hash_password`], on the blocking pool.
pub async fn hash_password_blocking(plaintext: &str, salt: &[u8]) -> Result<Vec<u8>, StoreError> {
    let plaintext = plaintext.to_string();
    let salt = salt.to_vec();
    tokio::task::spawn_blocking(move || hash_password(&plaintext, &salt))
        .await
        .map_err(|e| StoreError::Hashing(e.to_string()))?
}

/// Constant-time equality. Length mismatch is not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
