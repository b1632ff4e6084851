use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::correlator::{CallbackOutcome, ResolveOutcome};
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/agent/callback", post(agent_callback))
}

/// Body the AI agent posts when it has finished with a message.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AgentCallbackRequest {
    /// Id issued in the outbound webhook
    #[serde(default)]
    pub message_id: Option<String>,
    /// Reply text
    #[serde(default)]
    pub response: Option<String>,
    /// Any truthy value marks the run as failed
    #[serde(default)]
    #[schema(value_type = Object)]
    pub error: serde_json::Value,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AgentCallbackResponse {
    pub success: bool,
}

/// Receive the AI agent's reply for a previously dispatched message
#[utoipa::path(
    post,
    path = "/api/agent/callback",
    request_body = AgentCallbackRequest,
    responses(
        (status = 200, description = "Reply handed to the waiting request", body = AgentCallbackResponse),
        (status = 400, description = "message_id missing", body = carepilot_core::error::ApiError),
        (status = 404, description = "Message not found or already processed", body = carepilot_core::error::ApiError)
    ),
    tag = "agent"
)]
pub async fn agent_callback(
    State(state): State<AppState>,
    AppJson(req): AppJson<AgentCallbackRequest>,
) -> Result<Json<AgentCallbackResponse>, AppError> {
    let message_id = req
        .message_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation {
            message: "message_id is required".to_string(),
            field: Some("message_id".to_string()),
            received: None,
            docs_hint: Some("Echo the message_id from the webhook payload.".to_string()),
        })?;

    let outcome = if is_truthy(&req.error) {
        tracing::warn!(message_id = message_id, error = %req.error, "AI agent reported an error");
        CallbackOutcome::Failed
    } else {
        CallbackOutcome::Reply(req.response.unwrap_or_default())
    };

    match state.correlator.resolve(message_id, outcome) {
        ResolveOutcome::Resolved => Ok(Json(AgentCallbackResponse { success: true })),
        // Already resolved, timed out, or never issued by this process.
        ResolveOutcome::Unknown => Err(AppError::UnknownPendingMessage {
            message_id: message_id.to_string(),
        }),
    }
}

/// JSON truthiness as the agent platform means it: `false`, `null`, `0` and
/// `""` do not flag an error.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(flag) => *flag,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}
