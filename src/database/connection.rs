// Database Connection Management
//
// Handles PostgreSQL connection pooling using tokio-postgres and deadpool, and
// implements the credential and refresh-token repositories on top of it.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::str::FromStr;
use std::time::Duration;

use crate::database::models::{Credential, FromRow, RefreshRecord};
use crate::database::{CredentialRepository, RefreshTokenRepository, StoreError};

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub max_size: usize,
    pub accept_invalid_certs: bool,
    pub timeouts: deadpool_postgres::Timeouts,
}

impl DatabaseConfig {
    /// Parse a `postgres://` URL into a pool configuration.
    pub fn from_url(database_url: &str, max_size: usize, accept_invalid_certs: bool) -> Result<Self> {
        let config = tokio_postgres::Config::from_str(database_url)
            .context("Failed to parse DATABASE_URL")?;

        Ok(Self {
            host: config
                .get_hosts()
                .first()
                .map(|h| match h {
                    tokio_postgres::config::Host::Tcp(s) => s.clone(),
                    tokio_postgres::config::Host::Unix(s) => s.to_string_lossy().to_string(),
                })
                .unwrap_or_else(|| "localhost".to_string()),
            port: config.get_ports().first().cloned().unwrap_or(5432),
            user: config.get_user().map(|u| u.to_string()).unwrap_or_default(),
            password: config
                .get_password()
                .map(|p| String::from_utf8_lossy(p).to_string())
                .unwrap_or_default(),
            dbname: config.get_dbname().map(|d| d.to_string()).unwrap_or_default(),
            max_size,
            accept_invalid_certs,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(30)),
                create: Some(Duration::from_secs(30)),
                recycle: Some(Duration::from_secs(30)),
            },
        })
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .field("max_size", &self.max_size)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: Pool,
}

impl DatabaseConnection {
    /// Create a new database connection with the provided configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let masked_host = format!("{}:{}/{}", config.host, config.port, config.dbname);
        tracing::info!("🔌 Connecting to database: {}", masked_host);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.dbname(&config.dbname);

        let tls_connector = TlsConnector::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to build TLS connector")?;
        let tls = MakeTlsConnector::new(tls_connector);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, tls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(config.max_size)
            .wait_timeout(config.timeouts.wait)
            .create_timeout(config.timeouts.create)
            .recycle_timeout(config.timeouts.recycle)
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .context("Failed to create database pool")?;

        let connection = Self { pool };
        connection.health_check().await?;

        tracing::info!("✅ Database connection established successfully");

        Ok(connection)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get connection for health check")?;

        client
            .query("SELECT 1", &[])
            .await
            .context("Database health check failed")?;
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for DatabaseConnection {
    async fn load_credential(&self, user_id: &str) -> Result<Option<Credential>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT user_id, password_hash, salt, roles FROM credentials WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.map(|r| Credential::from_row(&r)).transpose()?)
    }

    async fn create_credential(&self, credential: &Credential) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let roles: Vec<&str> = credential.roles.iter().map(String::as_str).collect();
        let n = client
            .execute(
                "INSERT INTO credentials (user_id, password_hash, salt, roles)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (user_id) DO NOTHING",
                &[&credential.user_id, &credential.password_hash, &credential.salt, &roles],
            )
            .await?;
        Ok(n == 1)
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let roles: Vec<&str> = credential.roles.iter().map(String::as_str).collect();
        client
            .execute(
                "INSERT INTO credentials (user_id, password_hash, salt, roles)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (user_id) DO UPDATE
                 SET password_hash = EXCLUDED.password_hash,
                     salt = EXCLUDED.salt,
                     roles = EXCLUDED.roles,
                     updated_at = NOW()",
                &[&credential.user_id, &credential.password_hash, &credential.salt, &roles],
            )
            .await?;
        Ok(())
    }

    async fn delete_credential(&self, user_id: &str) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let n = client
            .execute("DELETE FROM credentials WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(n > 0)
    }

    async fn count_credentials(&self) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM credentials", &[]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl RefreshTokenRepository for DatabaseConnection {
    async fn save_refresh(&self, record: &RefreshRecord) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO refresh_tokens (token_id, user_id, secret_hash, expires_at, revoked, revoked_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &record.token_id,
                    &record.user_id,
                    &record.secret_hash,
                    &record.expires_at,
                    &record.revoked,
                    &record.revoked_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_refresh(&self, token_id: &str) -> Result<Option<RefreshRecord>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT token_id, user_id, secret_hash, expires_at, revoked, revoked_at
                 FROM refresh_tokens WHERE token_id = $1",
                &[&token_id],
            )
            .await?;
        Ok(row.map(|r| RefreshRecord::from_row(&r)).transpose()?)
    }

    async fn revoke_refresh_if_active(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2
                 WHERE token_id = $1 AND revoked = FALSE",
                &[&token_id, &at],
            )
            .await?;
        Ok(n == 1)
    }

    async fn revoke_all_refresh_for_user(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2
                 WHERE user_id = $1 AND revoked = FALSE",
                &[&user_id, &at],
            )
            .await?;
        Ok(n)
    }
}
