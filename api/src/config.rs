use std::time::Duration;

use url::Url;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Externally reachable origin, no trailing slash. Used for the agent
    /// callback address and for absolute audio links.
    pub public_base_url: String,
    pub agent_webhook_url: String,
    pub agent_response_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let port = match var("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let public_base_url = match var("PUBLIC_BASE_URL") {
            Some(raw) => raw,
            None => match var("REPLIT_DEV_DOMAIN") {
                Some(domain) => format!("https://{domain}"),
                None => format!("http://localhost:{port}"),
            },
        };
        let public_base_url = validate_http_url("PUBLIC_BASE_URL", &public_base_url)?
            .trim_end_matches('/')
            .to_string();

        let agent_webhook_url =
            var("AGENT_WEBHOOK_URL").ok_or(ConfigError::Missing("AGENT_WEBHOOK_URL"))?;
        validate_http_url("AGENT_WEBHOOK_URL", &agent_webhook_url)?;

        let timeout_secs = match var("AGENT_RESPONSE_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "AGENT_RESPONSE_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_RESPONSE_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "AGENT_RESPONSE_TIMEOUT_SECS",
                reason: "must be at least 1 second".to_string(),
            });
        }

        let cors_origins = var("CAREPILOT_CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url,
            port,
            public_base_url,
            agent_webhook_url,
            agent_response_timeout: Duration::from_secs(timeout_secs),
            cors_origins,
        })
    }

    /// Address the agent posts its replies to.
    pub fn callback_url(&self) -> String {
        format!("{}/api/agent/callback", self.public_base_url)
    }
}

fn validate_http_url<'a>(name: &'static str, raw: &'a str) -> Result<&'a str, ConfigError> {
    let parsed = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(raw)
}
