//! Outbound side of the agent bridge: the webhook body and the dispatcher
//! that delivers it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use carepilot_core::chat::MessageType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker the message route prepends to audio links.
pub const AUDIO_MARKER: &str = "Audio message: ";

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body posted to the agent's custom-trigger webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub message_id: String,
    pub conversation_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl WebhookPayload {
    pub fn new(
        message_id: &str,
        conversation_id: &str,
        content: &str,
        message_type: MessageType,
        callback_url: &str,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            message_type,
            timestamp: Utc::now(),
            callback_url: callback_url.to_string(),
            audio_url: extract_audio_url(message_type, content),
        }
    }
}

/// Pull the link out of `"Audio message: <url>"` content.
///
/// Only audio messages carry a link. The URL runs to the end of its line, and
/// a marker with nothing after it on the line is skipped in favour of a later
/// one.
pub fn extract_audio_url(message_type: MessageType, content: &str) -> Option<String> {
    if message_type != MessageType::Audio {
        return None;
    }
    content.match_indices(AUDIO_MARKER).find_map(|(start, _)| {
        let rest = &content[start + AUDIO_MARKER.len()..];
        let url = rest.split(is_line_terminator).next().unwrap_or_default();
        (!url.is_empty()).then(|| url.to_string())
    })
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The request never got a response (DNS, connect, TLS, timeout).
    #[error("agent webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The agent answered, but not with a 2xx.
    #[error("agent webhook rejected the message with status {status}")]
    Rejected { status: reqwest::StatusCode },
}

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// Delivers a payload to the external agent. Only delivery is reported;
/// the reply itself arrives later through the callback route.
pub trait AgentDispatcher: Send + Sync {
    fn dispatch<'a>(&'a self, payload: &'a WebhookPayload) -> DispatchFuture<'a>;
}

/// Posts payloads as JSON to a fixed webhook URL.
pub struct HttpDispatcher {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpDispatcher {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

impl AgentDispatcher for HttpDispatcher {
    fn dispatch<'a>(&'a self, payload: &'a WebhookPayload) -> DispatchFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.webhook_url)
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(DispatchError::Rejected { status });
            }
            Ok(())
        })
    }
}
