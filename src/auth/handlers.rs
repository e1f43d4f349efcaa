use axum::{
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::TokenKind,
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest},
        extractors::bearer_token,
        jwt::JwtKeys,
        password::{hash_password_blocking, verify_password_blocking},
        repo_types::User,
    },
    db::is_unique_violation,
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh))
}

fn issue_tokens(
    keys: &JwtKeys,
    user: User,
    message: &'static str,
) -> Result<AuthResponse, AppError> {
    Ok(AuthResponse {
        message,
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id)?,
        token_type: "Bearer",
        token_expires_in_minutes: keys.access_ttl_minutes(),
        user: PublicUser::from(user),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let payload = payload.normalize().map_err(|e| {
        warn!(error = %e, "registration rejected");
        e
    })?;

    if User::username_taken(&state.db, &payload.username).await? {
        warn!(username = %payload.username, "username already registered");
        return Err(AppError::Conflict("Username already exists.".into()));
    }
    if User::email_taken(&state.db, &payload.email).await? {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::Conflict("Email already exists.".into()));
    }

    let hash = hash_password_blocking(payload.password).await?;

    let user = User::create(&state.db, &payload.username, &payload.email, &hash)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, None) {
                AppError::Conflict("Username or email already exists.".into())
            } else {
                AppError::Database(e)
            }
        })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    let keys = JwtKeys::from_ref(&state);
    let body = issue_tokens(&keys, user, "User registered successfully")?;
    Ok((StatusCode::CREATED, Json(body)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let login = payload.username.trim();
    if login.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation("Username and password are required.".into()));
    }

    let invalid = || AppError::Unauthorized("Invalid credentials".into());

    let Some(user) = User::find_by_login(&state.db, login).await? else {
        warn!("login unknown user");
        return Err(invalid());
    };

    if !verify_password_blocking(payload.password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(invalid());
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login for inactive user");
        return Err(invalid());
    }

    info!(user_id = %user.id, "user logged in");
    let keys = JwtKeys::from_ref(&state);
    Ok(Json(issue_tokens(&keys, user, "Login successful")?))
}

/// Accepts a refresh token in the body, or falls back to a still-valid
/// bearer access token.
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);

    let verified = match &payload {
        Some(Json(body)) => keys.verify_refresh(&body.refresh_token),
        None => keys.verify_kind(bearer_token(&headers)?, TokenKind::Access),
    };
    let user_id: Uuid = verified
        .map_err(|e| {
            warn!(error = %e, "token refresh rejected");
            AppError::Unauthorized("Invalid or expired token".into())
        })?
        .sub;

    let user = User::find_by_id(&state.db, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;

    info!(user_id = %user.id, "token refreshed");
    Ok(Json(issue_tokens(&keys, user, "Token refreshed successfully")?))
}
