use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use carepilot_core::auth;
use carepilot_core::chat::User;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, is_unique_violation};
use crate::extract::AppJson;
use crate::state::AppState;

/// Sessions last a working week; the browser logs in again afterwards.
const SESSION_TTL_DAYS: i64 = 7;

pub fn signup_router() -> Router<AppState> {
    Router::new().route("/api/auth/signup", post(signup))
}

pub fn login_router() -> Router<AppState> {
    Router::new().route("/api/auth/login", post(login))
}

pub fn logout_router() -> Router<AppState> {
    Router::new().route("/api/auth/logout", post(logout))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by signup and login
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: User,
    /// Bearer token for all other `/api` routes
    pub access_token: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    full_name: String,
    is_active: bool,
    created_at: chrono::DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

fn validate_signup(req: &SignupRequest) -> Result<(), AppError> {
    if !auth::is_plausible_email(&auth::normalize_email(&req.email)) {
        return Err(AppError::Validation {
            message: "Please enter a valid email address".to_string(),
            field: Some("email".to_string()),
            received: Some(serde_json::Value::String(req.email.clone())),
            docs_hint: None,
        });
    }
    if req.password.chars().count() < auth::MIN_PASSWORD_LEN {
        return Err(AppError::Validation {
            message: format!(
                "Password must be at least {} characters",
                auth::MIN_PASSWORD_LEN
            ),
            field: Some("password".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    if req.full_name.trim().is_empty() {
        return Err(AppError::Validation {
            message: "Full name is required".to_string(),
            field: Some("fullName".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = SessionResponse),
        (status = 400, description = "Validation error", body = carepilot_core::error::ApiError),
        (status = 409, description = "Email already registered", body = carepilot_core::error::ApiError)
    ),
    tag = "auth"
)]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(req): AppJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_signup(&req)?;

    let email = auth::normalize_email(&req.email);
    let password_hash = auth::hash_password(&req.password)?;

    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, email, password_hash, full_name) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, email, password_hash, full_name, is_active, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(&email)
    .bind(&password_hash)
    .bind(req.full_name.trim())
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            return AppError::Conflict {
                message: "User already exists with this email".to_string(),
                field: Some("email".to_string()),
            };
        }
        AppError::Database(e)
    })?;

    let access_token = issue_session(&state.db, row.id).await?;
    tracing::info!(user_id = %row.id, "User signed up");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            user: row.into(),
            access_token,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Invalid credentials or deactivated account", body = carepilot_core::error::ApiError)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let invalid_credentials = || AppError::Unauthorized {
        message: "Invalid email or password".to_string(),
        docs_hint: None,
    };

    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, email, password_hash, full_name, is_active, created_at \
         FROM users WHERE email = $1",
    )
    .bind(auth::normalize_email(&req.email))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(invalid_credentials)?;

    if !auth::verify_password(&req.password, &row.password_hash)? {
        tracing::warn!(user_id = %row.id, "Login with wrong password");
        return Err(invalid_credentials());
    }

    if !row.is_active {
        return Err(AppError::Unauthorized {
            message: "Account is deactivated".to_string(),
            docs_hint: None,
        });
    }

    let access_token = issue_session(&state.db, row.id).await?;
    tracing::info!(user_id = %row.id, "User logged in");

    Ok(Json(SessionResponse {
        user: row.into(),
        access_token,
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Not authenticated", body = carepilot_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, AppError> {
    sqlx::query("UPDATE access_tokens SET is_revoked = TRUE WHERE id = $1")
        .bind(user.token_id)
        .execute(&state.db)
        .await?;
    tracing::info!(user_id = %user.user_id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Store a fresh session token and return it in clear (shown once).
pub(crate) async fn issue_session(
    pool: &sqlx::PgPool,
    user_id: Uuid,
) -> Result<String, AppError> {
    let (token, token_hash) = auth::generate_access_token();
    sqlx::query(
        "INSERT INTO access_tokens (id, user_id, token_hash, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(&token_hash)
    .bind(Utc::now() + Duration::days(SESSION_TTL_DAYS))
    .execute(pool)
    .await?;
    Ok(token)
}
