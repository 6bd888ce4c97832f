//! # Authentication Module
//!
//! Token issuance and verification, password credentials, revocation
//! tracking and the axum middleware that guards protected routes.

pub mod credentials;
pub mod errors;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod session;

pub use credentials::CredentialStore;
pub use jwt::{SigningKey, TokenCodec};
pub use session::SessionCache;
