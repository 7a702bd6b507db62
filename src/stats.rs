//! Periodic per-stream stats aggregation

use crate::broadcast;
use crate::state::{AppState, Topic};
use crate::store::queries;
use std::sync::Arc;

/// Stream ids with at least one subscriber. Rooms nobody watches cost
/// no store queries.
pub async fn subscribed_streams(state: &AppState) -> Vec<String> {
    let candidates: Vec<String> = state
        .rooms
        .iter()
        .filter_map(|entry| match entry.key() {
            Topic::Stream(stream_id) => Some(stream_id.clone()),
            _ => None,
        })
        .collect();

    let mut active = Vec::new();
    for stream_id in candidates {
        if let Some(room) = state.rooms.get(&Topic::Stream(stream_id.clone())) {
            if !room.subscribers.read().await.is_empty() {
                active.push(stream_id);
            }
        }
    }
    active
}

/// One aggregation pass. Streams that are no longer live yield no
/// stats frame at all; a store outage suspends the rest of the pass.
pub async fn broadcast_cycle(state: &Arc<AppState>) {
    for stream_id in subscribed_streams(state).await {
        match queries::stream_stats(&state.store, &stream_id).await {
            Ok(Some(stats)) => broadcast::stats_update(state, &stream_id, stats).await,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Stats pass suspended");
                break;
            }
        }
    }
}
