//! # Server Module
//!
//! HTTP server setup, dependency wiring and route configuration.

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::{CredentialStore, SessionCache, SigningKey, TokenCodec};
use crate::cache::MemoryCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, Config, JwtConfig, StoreConfig};
use crate::database::migrations::run_migrations;
use crate::database::{CredentialRepository, DatabaseConnection, MemoryStore, RefreshTokenRepository};
use crate::routes::{admin, auth, health::ping};
use crate::services::{AuthGateway, GatewaySettings};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AuthGateway>,
}

/// Credential and refresh-token repositories backing the gateway.
pub struct Stores {
    pub credentials: Arc<dyn CredentialRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
}

impl Stores {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Postgres(db_config) => {
                let db = Arc::new(DatabaseConnection::new(db_config.clone()).await?);
                run_migrations(db.pool()).await?;
                Ok(Self {
                    credentials: db.clone(),
                    refresh_tokens: db,
                })
            }
            StoreConfig::Memory => {
                warn!("⚠️  Using the in-memory store; accounts are lost on restart");
                let store = Arc::new(MemoryStore::new());
                Ok(Self {
                    credentials: store.clone(),
                    refresh_tokens: store,
                })
            }
        }
    }
}

/// Build the gateway from its configuration. Fails when the signing secret
/// is missing or too short.
pub fn build_gateway(
    jwt: &JwtConfig,
    cache_config: &CacheConfig,
    stores: Stores,
    cache: Arc<MemoryCache>,
    clock: Arc<dyn Clock>,
) -> Result<AuthGateway> {
    let key = SigningKey::from_secret(&jwt.secret).context("JWT_SECRET cannot be used as a signing key")?;
    let codec = TokenCodec::new(Arc::new(key), jwt.issuer.clone(), clock.clone());

    let credentials = CredentialStore::new(
        stores.credentials,
        cache.clone(),
        Duration::from_secs(cache_config.credential_ttl_secs),
    );
    let sessions = SessionCache::new(cache, clock.clone());

    Ok(AuthGateway::new(
        codec,
        credentials,
        sessions,
        stores.refresh_tokens,
        clock,
        GatewaySettings {
            access_ttl: chrono::Duration::seconds(jwt.access_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(jwt.refresh_ttl_secs),
        },
    ))
}

/// Assemble every route with CORS and request tracing.
pub fn router(state: AppState, cors_allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true);

    Router::new()
        .route("/ping", get(ping))
        .merge(auth::create_auth_routes(state.clone()))
        .merge(admin::create_admin_routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Starts the auth HTTP server and runs until shutdown.
pub async fn start(config: Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let _sweeper = cache.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));

    let stores = Stores::connect(&config.store).await?;
    let gateway = Arc::new(build_gateway(&config.jwt, &config.cache, stores, cache, clock)?);

    gateway
        .bootstrap_admin(
            &config.bootstrap.admin_user,
            config.bootstrap.admin_password.as_deref(),
        )
        .await
        .context("admin bootstrap failed")?;

    let app = router(AppState { gateway }, &config.cors_allowed_origins);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}, port may already be in use",
                config.server.host, config.server.port
            )
        })?;
    let addr = listener.local_addr()?;

    info!("🚀 Auth server starting...");
    info!("📡 Listening on http://{}", addr);
    info!("🏥 Health check available at http://{}/ping", addr);
    info!("🔑 Auth endpoints available at http://{}/api/auth/*", addr);
    info!("🛡️  Admin endpoints available at http://{}/api/admin/*", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
