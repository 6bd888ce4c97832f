//! Error types for token handling, authentication and authorization.
//!
//! Every variant maps to a fixed HTTP status and a fixed message. None of the
//! messages carry hashes, secrets or signing-key state.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::database::StoreError;

/// The process cannot sign tokens. Only fatal at startup.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing key is unavailable")]
    KeyUnavailable,
    #[error("signing key must be at least {min} bytes, got {actual}")]
    KeyTooShort { min: usize, actual: usize },
    #[error("failed to sign token")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

/// Why a presented token was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    /// Wrong issuer, algorithm or token kind.
    #[error("token is not trusted here")]
    Untrusted,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("invalid token: {0}")]
    TokenInvalid(InvalidTokenError),
    #[error("token has been revoked")]
    Revoked,
    #[error("insufficient role")]
    Forbidden,
}

impl From<InvalidTokenError> for AuthorizationError {
    fn from(err: InvalidTokenError) -> Self {
        AuthorizationError::TokenInvalid(err)
    }
}

/// Umbrella error returned by the gateway and the HTTP handlers.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error("missing bearer token")]
    MissingToken,
    #[error("account already exists")]
    AccountExists,
    #[error("unknown account")]
    UnknownAccount,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Backend(#[from] StoreError),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Authentication(_) | AuthError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthError::Authorization(AuthorizationError::Forbidden) => StatusCode::FORBIDDEN,
            AuthError::Authorization(_) => StatusCode::UNAUTHORIZED,
            AuthError::AccountExists => StatusCode::CONFLICT,
            AuthError::UnknownAccount => StatusCode::NOT_FOUND,
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::Signing(_) | AuthError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {:?}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let forbidden = AuthError::from(AuthorizationError::Forbidden);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let revoked = AuthError::from(AuthorizationError::Revoked);
        assert_eq!(revoked.status(), StatusCode::UNAUTHORIZED);

        let expired = AuthError::from(AuthorizationError::from(InvalidTokenError::Expired));
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);

        let bad_login = AuthError::from(AuthenticationError::InvalidCredentials);
        assert_eq!(bad_login.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(AuthError::AccountExists.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::Signing(SigningError::KeyUnavailable).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = AuthError::Signing(SigningError::KeyTooShort { min: 32, actual: 3 });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
