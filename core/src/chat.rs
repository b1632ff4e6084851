use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of content a chat message carries.
///
/// Closed set: the agent webhook and the `messages.message_type` column
/// both accept exactly these two values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Audio,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Audio => "audio",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type '{0}' (expected 'text' or 'audio')")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "audio" => Ok(MessageType::Audio),
            other => Err(UnknownMessageType(other.to_string())),
        }
    }
}

/// A care manager account as exposed to the browser. Never carries the
/// password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One chat thread between a user and the AI agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a message is added
    pub updated_at: DateTime<Utc>,
}

/// A single transcript entry, either from the user or from the agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub content: String,
    pub is_from_user: bool,
    pub message_type: MessageType,
    /// Object path (or absolute URL) of the recorded audio, audio messages only
    pub audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a conversation
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Must match the authenticated user when present
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Request to post a message into a conversation
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub conversation_id: Uuid,
    pub content: String,
    pub is_from_user: bool,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Response for `POST /api/messages`.
///
/// A user message yields the stored message plus the agent's reply;
/// any other message is echoed back alone.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum CreateMessageResponse {
    Exchange {
        #[serde(rename = "userMessage")]
        user_message: Message,
        #[serde(rename = "aiMessage")]
        ai_message: Message,
    },
    Single { message: Message },
}
