//! Topic-scoped event fan-out

use crate::error::AppError;
use crate::protocol::{ServerMessage, StreamStats};
use crate::state::{AppState, Topic};
use crate::store::queries;
use std::sync::Arc;
use uuid::Uuid;

/// Fan a message out to every subscriber of a topic. A dead socket is
/// logged and skipped; it never aborts delivery to the rest.
pub async fn broadcast_to_topic(state: &AppState, topic: &Topic, message: ServerMessage) {
    if let Some(room) = state.rooms.get(topic) {
        let subscribers = room.subscribers.read().await;
        for peer_id in subscribers.iter() {
            if let Some(session) = state.peers.get(peer_id) {
                if !session.send(message.clone()) {
                    tracing::warn!(peer_id = %peer_id, topic = ?topic, "Send to dead socket dropped");
                }
            }
        }
    }
}

/// Persist a chat message, then fan the durable record out to the
/// stream room. Nothing is broadcast when persistence fails; the error
/// surfaces only to the sender.
pub async fn chat_message(
    state: &Arc<AppState>,
    stream_id: &str,
    user_id: Option<Uuid>,
    user_name: &str,
    text: &str,
) -> Result<(), AppError> {
    let text = text.trim();
    if text.is_empty() || text.len() > 2000 {
        return Err(AppError::Validation(
            "message text must be 1-2000 characters".to_string(),
        ));
    }
    if user_name.trim().is_empty() {
        return Err(AppError::Validation("user name is required".to_string()));
    }

    let message = queries::insert_chat(&state.store, stream_id, user_id, user_name, text).await?;
    tracing::debug!(stream_id = %stream_id, message_id = message.id, "Chat message persisted");

    broadcast_to_topic(
        state,
        &Topic::Stream(stream_id.to_string()),
        ServerMessage::NewMessage { message },
    )
    .await;
    Ok(())
}

pub async fn viewer_kicked(state: &Arc<AppState>, user_id: Uuid) {
    broadcast_to_topic(state, &Topic::Status, ServerMessage::ViewerKicked { user_id }).await;
}

pub async fn stream_status_changed(state: &Arc<AppState>) {
    broadcast_to_topic(state, &Topic::Status, ServerMessage::StreamStatusChange).await;
}

pub async fn stream_updated(state: &Arc<AppState>) {
    broadcast_to_topic(state, &Topic::Status, ServerMessage::StreamUpdate).await;
}

pub async fn viewers_updated(state: &Arc<AppState>) {
    broadcast_to_topic(state, &Topic::Status, ServerMessage::ViewersUpdate).await;
}

/// Stats go to the stream room only; the status room never sees them.
pub async fn stats_update(state: &Arc<AppState>, stream_id: &str, stats: StreamStats) {
    broadcast_to_topic(
        state,
        &Topic::Stream(stream_id.to_string()),
        ServerMessage::Stats {
            stream_id: stream_id.to_string(),
            stats,
        },
    )
    .await;
}

pub async fn notification(state: &Arc<AppState>, user_id: Uuid) {
    broadcast_to_topic(
        state,
        &Topic::Notifications(user_id),
        ServerMessage::NewNotification,
    )
    .await;
}
