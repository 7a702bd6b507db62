//! Client-server message protocol definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client -> server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    // Connection
    Ping,
    Pong,

    // Subscriptions
    Subscribe { stream_id: String },
    Unsubscribe,
    SubscribeStreamStatus,
    SubscribeNotifications { user_id: Uuid },

    // Chat
    ChatMessage {
        stream_id: String,
        user_id: Option<Uuid>,
        user_name: String,
        text: String,
    },
}

/// Server -> client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    // Connection
    Connected { socket_id: String },
    Ping,
    Pong,
    Error { code: String, message: String },

    // Stream room events
    NewMessage { message: ChatMessage },
    Stats { stream_id: String, stats: StreamStats },

    // Status room signals; receivers re-fetch rather than carry payloads
    StreamStatusChange,
    StreamUpdate,
    ViewersUpdate,
    ViewerKicked { user_id: Uuid },

    // Notification room signal
    NewNotification,
}

/// A chat message as persisted; `id` is the durable server-assigned id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub stream_id: String,
    pub user_id: Option<Uuid>,
    pub user_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Periodic per-stream statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStats {
    pub current_viewers: i64,
    pub peak_viewers: i64,
    pub chat_messages: i64,
    pub duration_seconds: i64,
    pub is_live: bool,
}
