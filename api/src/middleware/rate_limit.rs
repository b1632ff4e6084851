use axum::http::Response;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

/// Rate limit for POST /api/auth/signup: 5 requests per hour per IP.
pub fn signup_layer() -> Option<RateLimitLayer> {
    build("signup", |config| config.per_second(720).burst_size(5))
}

/// Rate limit for POST /api/auth/login: 10 requests per minute per IP.
pub fn login_layer() -> Option<RateLimitLayer> {
    build("login", |config| config.per_second(6).burst_size(10))
}

/// Rate limit for POST /api/messages: 30 requests per minute per IP.
/// Each user message holds an agent request open for up to the reply timeout.
pub fn messages_write_layer() -> Option<RateLimitLayer> {
    build("messages_write", |config| config.per_second(2).burst_size(10))
}

fn build(
    name: &'static str,
    tune: impl FnOnce(
        &mut GovernorConfigBuilder<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware>,
    ) -> &mut GovernorConfigBuilder<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware>,
) -> Option<RateLimitLayer> {
    let mut builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    let Some(config) = tune(&mut builder).finish() else {
        tracing::error!(limiter = name, "Invalid rate limit configuration; limiter disabled");
        return None;
    };
    Some(GovernorLayer::new(config).error_handler(json_error_handler))
}

/// Returns JSON in ApiError format with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let body = serde_json::json!({
        "error": carepilot_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = Response::new(axum::body::Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    if let Some(wait_time) = retry_after {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, wait_time.into());
    }
    response
}
