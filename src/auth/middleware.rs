//! Authentication Middleware
//!
//! Axum middleware that authorizes the bearer token against a required role
//! and injects the resulting `Subject` for downstream handlers.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::auth::errors::AuthError;
use crate::services::AuthGateway;

/// The raw access token of the current request, for handlers that need it
/// (logout).
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Middleware state: the gateway plus the role every request must carry.
#[derive(Clone)]
pub struct RoleGuard {
    pub gateway: Arc<AuthGateway>,
    pub role: &'static str,
}

impl RoleGuard {
    pub fn new(gateway: Arc<AuthGateway>, role: &'static str) -> Self {
        Self { gateway, role }
    }
}

/// Authentication middleware that validates tokens and injects the subject
pub struct AuthMiddleware;

impl AuthMiddleware {
    pub async fn require_role(
        State(guard): State<RoleGuard>,
        mut req: Request,
        next: Next,
    ) -> Result<Response, AuthError> {
        let Some(token) = extract_token(req.headers()) else {
            tracing::warn!(
                "[AuthMiddleware] {} {}: missing Authorization header and access_token cookie",
                req.method(),
                req.uri()
            );
            return Err(AuthError::MissingToken);
        };

        let subject = match guard.gateway.authorize(&token, guard.role).await {
            Ok(subject) => subject,
            Err(e) => {
                tracing::warn!("[AuthMiddleware] {} {}: {}", req.method(), req.uri(), e);
                return Err(e);
            }
        };
        tracing::debug!(user_id = %subject.user_id, role = guard.role, "[AuthMiddleware] authorized");

        req.extensions_mut().insert(subject);
        req.extensions_mut().insert(BearerToken(token));

        Ok(next.run(req).await)
    }
}

/// Cookie carrying the access token for browser clients.
pub const ACCESS_COOKIE: &str = "access_token";

/// Bearer token from the Authorization header, falling back to the
/// `access_token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| {
            CookieJar::from_headers(headers)
                .get(ACCESS_COOKIE)
                .map(|cookie| cookie.value().to_string())
                .filter(|token| !token.is_empty())
        })
}
