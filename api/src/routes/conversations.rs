use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use carepilot_core::chat::{Conversation, CreateConversationRequest};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::state::AppState;

const DEFAULT_TITLE: &str = "New Conversation";
const MAX_TITLE_CHARS: usize = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations/{user_id}", get(list_conversations))
}

#[derive(sqlx::FromRow)]
pub(crate) struct ConversationRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// List a user's conversations, most recently active first
#[utoipa::path(
    get,
    path = "/api/conversations/{user_id}",
    params(("user_id" = Uuid, Path, description = "Owner of the conversations (must be the caller)")),
    responses(
        (status = 200, description = "Conversations, newest activity first", body = Vec<Conversation>),
        (status = 401, description = "Not authenticated", body = carepilot_core::error::ApiError),
        (status = 403, description = "Another user's conversations", body = carepilot_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "conversations"
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(user_id): AppPath<Uuid>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    user.ensure_is(user_id)?;

    let rows = sqlx::query_as::<_, ConversationRow>(
        "SELECT id, user_id, title, created_at, updated_at \
         FROM conversations WHERE user_id = $1 \
         ORDER BY updated_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows.into_iter().map(Conversation::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 200, description = "Conversation created", body = Conversation),
        (status = 400, description = "Validation error", body = carepilot_core::error::ApiError),
        (status = 403, description = "userId is not the caller", body = carepilot_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "conversations"
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(req): AppJson<CreateConversationRequest>,
) -> Result<Json<Conversation>, AppError> {
    if let Some(owner) = req.user_id {
        user.ensure_is(owner)?;
    }
    let title = normalize_title(req.title.as_deref())?;

    let row = sqlx::query_as::<_, ConversationRow>(
        "INSERT INTO conversations (id, user_id, title) VALUES ($1, $2, $3) \
         RETURNING id, user_id, title, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(user.user_id)
    .bind(&title)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %user.user_id, conversation_id = %row.id, "Conversation created");
    Ok(Json(row.into()))
}

fn normalize_title(title: Option<&str>) -> Result<String, AppError> {
    let title = title.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Ok(DEFAULT_TITLE.to_string());
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::Validation {
            message: format!("title must be at most {MAX_TITLE_CHARS} characters"),
            field: Some("title".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(title.to_string())
}

/// Look up a conversation the caller owns. Someone else's conversation is
/// reported as missing.
pub(crate) async fn find_owned(
    pool: &sqlx::PgPool,
    user: &AuthenticatedUser,
    conversation_id: Uuid,
) -> Result<Conversation, AppError> {
    sqlx::query_as::<_, ConversationRow>(
        "SELECT id, user_id, title, created_at, updated_at \
         FROM conversations WHERE id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user.user_id)
    .fetch_optional(pool)
    .await?
    .map(Conversation::from)
    .ok_or_else(|| AppError::NotFound {
        resource: format!("Conversation {conversation_id}"),
    })
}
