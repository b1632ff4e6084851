use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// CORS for the browser client.
///
/// Only the configured origins are allowed; unparsable entries are skipped
/// with a warning. The agent callback is server-to-server and is not affected.
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::build_cors_layer;

    async fn ok() -> StatusCode {
        StatusCode::OK
    }

    async fn preflight(origin: &str) -> axum::response::Response {
        let app = Router::new()
            .route("/api/messages", get(ok))
            .layer(build_cors_layer(&[
                "http://localhost:5000".to_string(),
                "not a header\u{0}".to_string(),
            ]));
        app.oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/messages")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("request should succeed")
    }

    #[tokio::test]
    async fn configured_origin_is_allowed() {
        let response = preflight("http://localhost:5000").await;
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .expect("allow-origin header should exist"),
            "http://localhost:5000"
        );
    }

    #[tokio::test]
    async fn other_origins_get_no_allow_header() {
        let response = preflight("https://evil.example").await;
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
