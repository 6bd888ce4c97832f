//! Auth routes for registration, login, refresh, logout and account info

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use axum::body::Bytes;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::{Value, json};

use crate::auth::errors::{AuthError, AuthenticationError};
use crate::auth::middleware::{ACCESS_COOKIE, AuthMiddleware, BearerToken, RoleGuard};
use crate::auth::models::{
    ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterRequest, Subject, TokenPair,
    TokenResponse, roles,
};
use crate::server::AppState;

const REFRESH_COOKIE: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let user_id = payload.user_id.trim();
    state.gateway.register(user_id, &payload.password).await?;
    Ok((StatusCode::CREATED, Json(json!({ "user_id": user_id }))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), AuthError> {
    let pair = state
        .gateway
        .login(payload.user_id.trim(), &payload.password)
        .await?;
    Ok((with_token_cookies(jar, &pair), Json(TokenResponse::from(&pair))))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<TokenResponse>), AuthError> {
    // The body is optional; browsers send the refresh cookie only.
    let payload: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| AuthError::InvalidInput("malformed refresh request"))?
    };

    let presented = payload
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or(AuthError::from(AuthenticationError::InvalidRefreshToken))?;

    let pair = state.gateway.refresh(&presented).await?;
    Ok((with_token_cookies(jar, &pair), Json(TokenResponse::from(&pair))))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    state.gateway.logout(&token).await?;
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        state.gateway.revoke_refresh(cookie.value()).await?;
    }
    let jar = jar
        .remove(Cookie::build(REFRESH_COOKIE).path(REFRESH_COOKIE_PATH))
        .remove(Cookie::build(ACCESS_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn me(Extension(subject): Extension<Subject>) -> Json<Value> {
    Json(json!({
        "user_id": subject.user_id,
        "roles": subject.roles,
        "expires_at": subject.expires_at.timestamp(),
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AuthError> {
    state
        .gateway
        .change_password(&subject.user_id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn with_token_cookies(jar: CookieJar, pair: &TokenPair) -> CookieJar {
    let issued_at = pair.access.token.issued_at;
    jar.add(token_cookie(
        ACCESS_COOKIE,
        &pair.access.encoded,
        "/",
        pair.access.token.expires_at - issued_at,
    ))
    .add(token_cookie(
        REFRESH_COOKIE,
        &pair.refresh.encoded,
        REFRESH_COOKIE_PATH,
        pair.refresh.token.expires_at - issued_at,
    ))
}

fn token_cookie(name: &'static str, value: &str, path: &'static str, max_age: chrono::Duration) -> Cookie<'static> {
    Cookie::build((name, value.to_string()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path(path)
        .max_age(time::Duration::seconds(max_age.num_seconds().max(0)))
        .build()
}

pub fn create_auth_routes(state: AppState) -> Router<AppState> {
    let guard = RoleGuard::new(state.gateway.clone(), roles::USER);

    let protected = Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/password", put(change_password))
        .layer(middleware::from_fn_with_state(guard, AuthMiddleware::require_role));

    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .merge(protected)
}
