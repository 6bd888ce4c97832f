//! Admin routes, guarded by the `admin` role.

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::delete,
};

use crate::auth::errors::AuthError;
use crate::auth::middleware::{AuthMiddleware, RoleGuard};
use crate::auth::models::roles;
use crate::server::AppState;

/// Delete an account and every refresh token it holds.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    state.gateway.delete_account(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_admin_routes(state: AppState) -> Router<AppState> {
    let guard = RoleGuard::new(state.gateway.clone(), roles::ADMIN);

    Router::new()
        .route("/api/admin/users/{user_id}", delete(delete_user))
        .layer(middleware::from_fn_with_state(guard, AuthMiddleware::require_role))
}
