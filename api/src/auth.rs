use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use uuid::Uuid;

use carepilot_core::auth::{ACCESS_TOKEN_PREFIX, hash_token};

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub token_id: Uuid,
}

impl AuthenticatedUser {
    /// Reject access to another user's resources.
    pub fn ensure_is(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.user_id == user_id {
            return Ok(());
        }
        tracing::warn!(
            user_id = %self.user_id,
            requested_user_id = %user_id,
            "cross-user access denied"
        );
        Err(AppError::Forbidden {
            message: "You can only access your own conversations".to_string(),
            docs_hint: None,
        })
    }
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        authenticate_access_token(token, &state.db).await
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized {
            message: "Missing Authorization header".to_string(),
            docs_hint: Some(
                "Include 'Authorization: Bearer <token>' using the accessToken returned by login."
                    .to_string(),
            ),
        })?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use Bearer scheme".to_string(),
            docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
        })?;

    if !token.starts_with(ACCESS_TOKEN_PREFIX) {
        return Err(AppError::Unauthorized {
            message: "Invalid token format".to_string(),
            docs_hint: Some(format!(
                "Access tokens start with '{ACCESS_TOKEN_PREFIX}'. Log in again to get one."
            )),
        });
    }
    Ok(token)
}

async fn authenticate_access_token(
    token: &str,
    pool: &sqlx::PgPool,
) -> Result<AuthenticatedUser, AppError> {
    let token_hash = hash_token(token);

    let row = sqlx::query_as::<_, AccessTokenRow>(
        "SELECT t.id, t.user_id, t.expires_at \
         FROM access_tokens t \
         JOIN users u ON u.id = t.user_id \
         WHERE t.token_hash = $1 \
           AND t.is_revoked = FALSE \
           AND u.is_active = TRUE",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)?
    .ok_or_else(|| AppError::Unauthorized {
        message: "Invalid access token".to_string(),
        docs_hint: Some("The session was revoked or never existed. Log in again.".to_string()),
    })?;

    if Utc::now() > row.expires_at {
        return Err(AppError::Unauthorized {
            message: "Access token has expired".to_string(),
            docs_hint: Some("Log in again to start a new session.".to_string()),
        });
    }

    Ok(AuthenticatedUser {
        user_id: row.user_id,
        token_id: row.id,
    })
}

#[derive(sqlx::FromRow)]
struct AccessTokenRow {
    id: Uuid,
    user_id: Uuid,
    expires_at: chrono::DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use uuid::Uuid;

    use super::{AuthenticatedUser, bearer_token};
    use crate::error::AppError;

    fn parts_with(header: Option<&str>) -> axum::http::request::Parts {
        let mut builder = Request::builder().uri("/api/conversations");
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        builder.body(()).expect("request should build").into_parts().0
    }

    #[test]
    fn bearer_token_requires_header() {
        let err = bearer_token(&parts_with(None)).expect_err("missing header must fail");
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[test]
    fn bearer_token_requires_bearer_scheme() {
        let parts = parts_with(Some("Basic Zm9vOmJhcg=="));
        assert!(bearer_token(&parts).is_err());
    }

    #[test]
    fn bearer_token_requires_session_prefix() {
        let parts = parts_with(Some("Bearer sk_live_abcdef"));
        assert!(bearer_token(&parts).is_err());
    }

    #[test]
    fn bearer_token_returns_token() {
        let parts = parts_with(Some("Bearer cp_at_0123abcd"));
        assert_eq!(bearer_token(&parts).unwrap(), "cp_at_0123abcd");
    }

    #[test]
    fn ensure_is_rejects_other_users() {
        let user = AuthenticatedUser {
            user_id: Uuid::now_v7(),
            token_id: Uuid::now_v7(),
        };
        assert!(user.ensure_is(user.user_id).is_ok());
        let err = user.ensure_is(Uuid::now_v7()).expect_err("other user must fail");
        assert!(matches!(err, AppError::Forbidden { .. }));
    }
}
