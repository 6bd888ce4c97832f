//! # Database Module
//!
//! Durable storage for credentials and refresh-token records.
//! Postgres (tokio-postgres + deadpool) in production, an in-memory store for
//! development and tests. Both sit behind the repository traits below.

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::CacheError;

pub use connection::{DatabaseConfig, DatabaseConnection};
pub use memory::MemoryStore;
pub use models::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn load_credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError>;

    /// Insert only. Returns false if `user_id` is already taken.
    async fn create_credential(&self, credential: &Credential) -> Result<bool, StoreError>;

    /// Insert or replace.
    async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError>;

    async fn delete_credential(&self, user_id: &str) -> Result<bool, StoreError>;

    async fn count_credentials(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn save_refresh(&self, record: &RefreshRecord) -> Result<(), StoreError>;

    async fn find_refresh(&self, token_id: &str) -> Result<Option<RefreshRecord>, StoreError>;

    /// Atomically flip `revoked` from false to true. Returns false if the
    /// record is missing or was already revoked.
    async fn revoke_refresh_if_active(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn revoke_all_refresh_for_user(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
