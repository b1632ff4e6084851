use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower::util::option_layer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod correlator;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;

use config::{Config, ConfigError};
use correlator::ResponseCorrelator;
use correlator::webhook::{DispatchError, HttpDispatcher};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Care Manager Co-pilot API",
        version = "0.1.0",
        description = "Chat backend for care managers. User messages are relayed to an external AI agent whose replies arrive by webhook callback."
    ),
    paths(
        routes::health::health_check,
        routes::auth::signup,
        routes::auth::login,
        routes::auth::logout,
        routes::conversations::list_conversations,
        routes::conversations::create_conversation,
        routes::messages::list_messages,
        routes::messages::create_message,
        routes::agent_callback::agent_callback,
    ),
    components(schemas(
        HealthResponse,
        carepilot_core::error::ApiError,
        carepilot_core::chat::User,
        carepilot_core::chat::Conversation,
        carepilot_core::chat::Message,
        carepilot_core::chat::MessageType,
        carepilot_core::chat::CreateConversationRequest,
        carepilot_core::chat::CreateMessageRequest,
        carepilot_core::chat::CreateMessageResponse,
        routes::auth::SignupRequest,
        routes::auth::LoginRequest,
        routes::auth::SessionResponse,
        routes::agent_callback::AgentCallbackRequest,
        routes::agent_callback::AgentCallbackResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Agent requests still waiting for a callback
    pub pending_responses: usize,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to build agent webhook client: {0}")]
    Dispatcher(#[from] DispatchError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carepilot_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "Care Manager Co-pilot API failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    let dispatcher = Arc::new(HttpDispatcher::new(config.agent_webhook_url.clone())?);
    let correlator = Arc::new(ResponseCorrelator::new(
        dispatcher,
        config.callback_url(),
        config.agent_response_timeout,
    ));
    tracing::info!(
        callback_url = %config.callback_url(),
        timeout_secs = config.agent_response_timeout.as_secs(),
        "Agent bridge ready"
    );

    let app_state = state::AppState {
        db: pool,
        correlator,
        public_base_url: config.public_base_url.clone(),
    };

    let app = build_router(app_state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Care Manager Co-pilot API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

fn build_router(app_state: state::AppState, config: &Config) -> Router {
    use middleware::rate_limit;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::auth::signup_router().layer(option_layer(rate_limit::signup_layer())))
        .merge(routes::auth::login_router().layer(option_layer(rate_limit::login_layer())))
        .merge(routes::auth::logout_router())
        .merge(routes::conversations::router())
        .merge(routes::messages::read_router())
        .merge(
            routes::messages::write_router()
                .layer(option_layer(rate_limit::messages_write_layer())),
        )
        .merge(routes::agent_callback::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(&config.cors_origins)),
        )
        .with_state(app_state)
}

/// In-flight agent requests are dropped on shutdown; their callbacks will 404.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
