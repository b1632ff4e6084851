use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use carepilot_core::error::{self, ApiError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing, invalid or expired credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Authenticated, but not allowed to touch this resource (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Resource does not exist or is not visible to the caller (404)
    NotFound { resource: String },
    /// Agent callback for a message nobody is waiting on (404)
    UnknownPendingMessage { message_id: String },
    /// Unique constraint clash, e.g. an email already registered (409)
    Conflict {
        message: String,
        field: Option<String>,
    },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    error: error::codes::FORBIDDEN.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::UnknownPendingMessage { message_id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: "Message not found or already processed".to_string(),
                    field: Some("message_id".to_string()),
                    received: Some(serde_json::Value::String(message_id)),
                    request_id,
                    docs_hint: Some(
                        "The reply was already delivered, or the request timed out.".to_string(),
                    ),
                },
            ),
            AppError::Conflict { message, field } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message,
                    field,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Database(err) => {
                tracing::error!(request_id = %request_id, "Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = %request_id, "Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<carepilot_core::auth::PasswordError> for AppError {
    fn from(err: carepilot_core::auth::PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Postgres unique_violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::AppError;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        (
            status,
            serde_json::from_slice(&body).expect("body should be JSON"),
        )
    }

    #[tokio::test]
    async fn not_found_renders_resource_name() {
        let (status, body) = render(AppError::NotFound {
            resource: "Conversation 42".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Conversation 42 not found");
        assert!(body["request_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn unknown_pending_message_uses_fixed_message() {
        let (status, body) = render(AppError::UnknownPendingMessage {
            message_id: "msg_1_abc".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Message not found or already processed");
        assert_eq!(body["received"], "msg_1_abc");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) = render(AppError::Internal("secret detail".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "An internal error occurred");
        assert!(!body.to_string().contains("secret detail"));
    }

    #[tokio::test]
    async fn validation_keeps_field_and_omits_empty_hints() {
        let (status, body) = render(AppError::Validation {
            message: "password must be at least 8 characters".to_string(),
            field: Some("password".to_string()),
            received: None,
            docs_hint: None,
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "password");
        assert!(body.get("docs_hint").is_none());
        assert!(body.get("received").is_none());
    }
}
