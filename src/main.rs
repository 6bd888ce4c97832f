//! # Authgate Server
//!
//! Token-based authentication service built with Rust, Axum, and Tokio.
//!
//! ## Features
//! - Signed, expiring access tokens with role claims
//! - Refresh-token rotation with reuse detection
//! - Logout through a revocation cache that forgets entries once the token
//!   would have expired anyway
//! - Argon2 password hashing with cached credential lookups
//! - PostgreSQL persistence with embedded migrations, or an in-memory store
//!
//! ## Architecture
//! - `server`: dependency wiring and router assembly
//! - `config`: environment variable configuration
//! - `auth`: token codec, credentials, revocation cache, middleware
//! - `services`: the auth gateway tying the pieces together
//! - `cache`: expiring key/value cache
//! - `database`: repositories, PostgreSQL pool, migrations
//! - `routes`: HTTP handlers
//!
//! ## Environment Setup
//! ```bash
//! export JWT_SECRET="$(openssl rand -base64 48)"
//! export STORE_BACKEND=memory
//! export BOOTSTRAP_ADMIN_PASSWORD=change-me
//! cargo run
//! ```
//!
//! ## Health Check
//! ```bash
//! curl http://localhost:3000/ping
//! ```

mod auth;
mod cache;
mod clock;
mod config;
mod database;
mod routes;
mod server;
mod services;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false) // Don't show module targets for cleaner output
                .compact(),
        )
        .init();

    tracing::info!("🏁 Starting Authgate Server...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "🏗️  Build profile: {}",
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server::start(config).await {
        tracing::error!("❌ Server failed: {:#}", e);
        std::process::exit(1);
    }
}
