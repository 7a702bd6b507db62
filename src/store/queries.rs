//! Parameterized store queries

use crate::error::AppError;
use crate::protocol::{ChatMessage, StreamStats};
use crate::store::StorePool;
use tokio_postgres::Row;
use uuid::Uuid;

/// Insert a chat message and return the persisted record, including the
/// server-assigned id and timestamp.
pub async fn insert_chat(
    store: &StorePool,
    stream_id: &str,
    user_id: Option<Uuid>,
    user_name: &str,
    text: &str,
) -> Result<ChatMessage, AppError> {
    let client = store.client().await?;
    let row = client
        .query_one(
            "INSERT INTO chat_messages (stream_id, user_id, user_name, text) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, stream_id, user_id, user_name, text, created_at",
            &[&stream_id, &user_id, &user_name, &text],
        )
        .await
        .map_err(|e| store.query_error(e))?;

    Ok(chat_from_row(&row))
}

/// Aggregate stats for one stream. `None` when the stream is unknown or
/// no longer live, so "ended" stays distinguishable from "zero viewers".
pub async fn stream_stats(
    store: &StorePool,
    stream_id: &str,
) -> Result<Option<StreamStats>, AppError> {
    let client = store.client().await?;
    let row = client
        .query_opt(
            "SELECT l.is_live, \
                    COALESCE(l.viewers, 0)::BIGINT AS current_viewers, \
                    COALESCE(l.peak_viewers, 0)::BIGINT AS peak_viewers, \
                    COUNT(cm.id)::BIGINT AS chat_messages, \
                    CASE WHEN l.is_live AND l.start_time IS NOT NULL \
                         THEN EXTRACT(EPOCH FROM (NOW() - l.start_time))::BIGINT \
                         ELSE 0 END AS duration_seconds \
             FROM livestreams l \
             LEFT JOIN chat_messages cm ON cm.stream_id = l.stream_id \
             WHERE l.stream_id = $1 \
             GROUP BY l.id",
            &[&stream_id],
        )
        .await
        .map_err(|e| store.query_error(e))?;

    Ok(row.and_then(|row| {
        let is_live: bool = row.get("is_live");
        if !is_live {
            return None;
        }
        Some(StreamStats {
            current_viewers: row.get("current_viewers"),
            peak_viewers: row.get("peak_viewers"),
            chat_messages: row.get("chat_messages"),
            duration_seconds: row.get("duration_seconds"),
            is_live,
        })
    }))
}

/// Upsert the stream row as live with a fresh start time.
pub async fn mark_live(store: &StorePool, stream_id: &str) -> Result<(), AppError> {
    let client = store.client().await?;
    client
        .execute(
            "INSERT INTO livestreams (stream_id, is_live, start_time, viewers, peak_viewers) \
             VALUES ($1, TRUE, NOW(), 0, 0) \
             ON CONFLICT (stream_id) DO UPDATE \
             SET is_live = TRUE, start_time = NOW(), end_time = NULL, viewers = 0, peak_viewers = 0",
            &[&stream_id],
        )
        .await
        .map_err(|e| store.query_error(e))?;
    Ok(())
}

/// Close the stream row, recording the final and peak viewer counts.
pub async fn mark_ended(
    store: &StorePool,
    stream_id: &str,
    final_viewers: i64,
    peak_viewers: i64,
) -> Result<(), AppError> {
    let client = store.client().await?;
    client
        .execute(
            "UPDATE livestreams \
             SET is_live = FALSE, end_time = NOW(), viewers = $2, peak_viewers = $3 \
             WHERE stream_id = $1 AND is_live = TRUE",
            &[&stream_id, &final_viewers, &peak_viewers],
        )
        .await
        .map_err(|e| store.query_error(e))?;
    Ok(())
}

/// Counter update pushed on every viewer join/leave/kick.
pub async fn update_viewer_counts(
    store: &StorePool,
    stream_id: &str,
    current: i64,
    peak: i64,
) -> Result<(), AppError> {
    let client = store.client().await?;
    client
        .execute(
            "UPDATE livestreams SET viewers = $2, peak_viewers = $3 WHERE stream_id = $1",
            &[&stream_id, &current, &peak],
        )
        .await
        .map_err(|e| store.query_error(e))?;
    Ok(())
}

fn chat_from_row(row: &Row) -> ChatMessage {
    ChatMessage {
        id: row.get("id"),
        stream_id: row.get("stream_id"),
        user_id: row.get("user_id"),
        user_name: row.get("user_name"),
        text: row.get("text"),
        created_at: row.get("created_at"),
    }
}
