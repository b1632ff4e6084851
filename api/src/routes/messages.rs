use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use carepilot_core::chat::{CreateMessageRequest, CreateMessageResponse, Message, MessageType};

use crate::auth::AuthenticatedUser;
use crate::correlator::webhook::AUDIO_MARKER;
use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::routes::conversations::find_owned;
use crate::state::AppState;

const MAX_CONTENT_CHARS: usize = 10_000;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/api/messages/{conversation_id}", get(list_messages))
}

pub fn write_router() -> Router<AppState> {
    Router::new().route("/api/messages", post(create_message))
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    content: String,
    is_from_user: bool,
    message_type: String,
    audio_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = row
            .message_type
            .parse::<MessageType>()
            .map_err(|e| AppError::Internal(format!("message {}: {e}", row.id)))?;
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            content: row.content,
            is_from_user: row.is_from_user,
            message_type,
            audio_url: row.audio_url,
            created_at: row.created_at,
        })
    }
}

/// Transcript of a conversation, oldest first
#[utoipa::path(
    get,
    path = "/api/messages/{conversation_id}",
    params(("conversation_id" = Uuid, Path, description = "Conversation to read")),
    responses(
        (status = 200, description = "Messages in chronological order", body = Vec<Message>),
        (status = 401, description = "Not authenticated", body = carepilot_core::error::ApiError),
        (status = 404, description = "Unknown conversation", body = carepilot_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "messages"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(conversation_id): AppPath<Uuid>,
) -> Result<Json<Vec<Message>>, AppError> {
    find_owned(&state.db, &user, conversation_id).await?;

    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT id, conversation_id, content, is_from_user, message_type, audio_url, created_at \
         FROM messages WHERE conversation_id = $1 \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(conversation_id)
    .fetch_all(&state.db)
    .await?;

    let messages = rows
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(messages))
}

/// Post a message. User messages are forwarded to the AI agent and the call
/// returns once its reply (or a fallback reply) has been stored.
#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = CreateMessageRequest,
    responses(
        (status = 200, description = "Stored message, plus the agent reply for user messages", body = CreateMessageResponse),
        (status = 400, description = "Validation error", body = carepilot_core::error::ApiError),
        (status = 404, description = "Unknown conversation", body = carepilot_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "messages"
)]
pub async fn create_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(req): AppJson<CreateMessageRequest>,
) -> Result<Json<CreateMessageResponse>, AppError> {
    validate_message(&req)?;
    find_owned(&state.db, &user, req.conversation_id).await?;

    let message = insert_message(
        &state.db,
        NewMessage {
            conversation_id: req.conversation_id,
            content: &req.content,
            is_from_user: req.is_from_user,
            message_type: req.message_type,
            audio_url: req.audio_url.as_deref(),
        },
    )
    .await?;

    if !req.is_from_user {
        return Ok(Json(CreateMessageResponse::Single { message }));
    }

    let content_for_agent = agent_content(&req, &state.public_base_url);
    let reply = state
        .correlator
        .request_ai_response(
            &content_for_agent,
            req.message_type,
            &req.conversation_id.to_string(),
        )
        .await;

    let ai_message = insert_message(
        &state.db,
        NewMessage {
            conversation_id: req.conversation_id,
            content: &reply,
            is_from_user: false,
            message_type: MessageType::Text,
            audio_url: None,
        },
    )
    .await?;

    Ok(Json(CreateMessageResponse::Exchange {
        user_message: message,
        ai_message,
    }))
}

fn validate_message(req: &CreateMessageRequest) -> Result<(), AppError> {
    if req.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::Validation {
            message: format!("content must be at most {MAX_CONTENT_CHARS} characters"),
            field: Some("content".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    if req.audio_url.is_some() && req.message_type != MessageType::Audio {
        return Err(AppError::Validation {
            message: "audioUrl is only allowed on audio messages".to_string(),
            field: Some("audioUrl".to_string()),
            received: req.audio_url.clone().map(serde_json::Value::String),
            docs_hint: Some("Send messageType \"audio\" together with audioUrl.".to_string()),
        });
    }
    Ok(())
}

/// What the agent sees for a user message. Recorded audio is sent as a
/// public link behind the audio marker; everything else as typed.
fn agent_content(req: &CreateMessageRequest, public_base_url: &str) -> String {
    let audio_url = req
        .audio_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());

    match (req.message_type, audio_url) {
        (MessageType::Audio, Some(url)) => {
            format!("{AUDIO_MARKER}{}", public_audio_url(url, public_base_url))
        }
        _ => req.content.clone(),
    }
}

fn public_audio_url(audio_url: &str, public_base_url: &str) -> String {
    if audio_url.starts_with("http://") || audio_url.starts_with("https://") {
        return audio_url.to_string();
    }
    let base = public_base_url.trim_end_matches('/');
    if audio_url.starts_with('/') {
        format!("{base}{audio_url}")
    } else {
        format!("{base}/{audio_url}")
    }
}

struct NewMessage<'a> {
    conversation_id: Uuid,
    content: &'a str,
    is_from_user: bool,
    message_type: MessageType,
    audio_url: Option<&'a str>,
}

/// Store a message and mark its conversation as recently active.
async fn insert_message(pool: &sqlx::PgPool, new: NewMessage<'_>) -> Result<Message, AppError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, conversation_id, content, is_from_user, message_type, audio_url) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING id, conversation_id, content, is_from_user, message_type, audio_url, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(new.conversation_id)
    .bind(new.content)
    .bind(new.is_from_user)
    .bind(new.message_type.as_str())
    .bind(new.audio_url)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
        .bind(new.conversation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Message::try_from(row)
}
