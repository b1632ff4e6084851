//! Extractors that turn axum's plain-text rejections into `AppError` JSON.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Drop-in replacement for `axum::Json<T>` in handler signatures.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Drop-in replacement for `axum::extract::Path<T>`; a malformed id is a 400
/// with the offending segment named.
pub struct AppPath<T>(pub T);

impl<S, T> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(AppPath(value)),
            Err(rejection) => Err(map_path_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    AppError::Validation {
        field: Some(field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string())),
        message: format!("Invalid request body: {body_text}"),
        received: None,
        docs_hint: Some("See /api-doc/openapi.json for the request schema.".to_string()),
    }
}

fn map_path_rejection(rejection: PathRejection) -> AppError {
    AppError::Validation {
        message: format!("Invalid path parameter: {}", rejection.body_text()),
        field: Some("path".to_string()),
        received: None,
        docs_hint: Some("Identifiers in the path are UUIDs.".to_string()),
    }
}

/// Pull the field name out of serde's "missing field `x`" / "unknown field `x`".
fn field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"]
        .iter()
        .find_map(|pattern| msg.split_once(pattern))
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(field, _)| field.to_string())
}
