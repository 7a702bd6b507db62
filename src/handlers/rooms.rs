//! Topic subscription management

use crate::error::AppError;
use crate::state::{AppState, Room, Topic};
use std::collections::HashSet;

/// Add a connection to a topic. Idempotent. Stream rooms enforce the
/// subscriber ceiling and the one-stream-room-per-connection rule
/// (last subscribe wins).
pub async fn subscribe(state: &AppState, peer_id: &str, topic: Topic) -> Result<(), AppError> {
    let session = state
        .peers
        .get(peer_id)
        .ok_or_else(|| AppError::Validation("unknown connection".to_string()))?;

    if let Topic::Stream(stream_id) = &topic {
        {
            let room = state.rooms.entry(topic.clone()).or_insert_with(Room::new);
            let mut subscribers = room.subscribers.write().await;
            if subscribers.len() >= state.config.room.max_subscribers
                && !subscribers.contains(peer_id)
            {
                tracing::warn!(peer_id = %peer_id, stream_id = %stream_id, "Room full, subscribe rejected");
                return Err(AppError::CapacityExceeded);
            }
            subscribers.insert(peer_id.to_string());
        }

        let previous = session.stream_room.write().await.replace(stream_id.clone());
        if let Some(previous) = previous {
            if previous != *stream_id {
                let old_topic = Topic::Stream(previous);
                session.topics.write().await.remove(&old_topic);
                remove_from_room(state, peer_id, &old_topic).await;
            }
        }
    } else {
        let room = state.rooms.entry(topic.clone()).or_insert_with(Room::new);
        room.subscribers.write().await.insert(peer_id.to_string());
    }

    session.topics.write().await.insert(topic.clone());
    tracing::info!(peer_id = %peer_id, topic = ?topic, "Subscribed");
    Ok(())
}

/// Remove one membership, pruning the group if it empties.
pub async fn unsubscribe(state: &AppState, peer_id: &str, topic: &Topic) {
    if let Some(session) = state.peers.get(peer_id) {
        session.topics.write().await.remove(topic);
        if let Topic::Stream(stream_id) = topic {
            let mut room = session.stream_room.write().await;
            if room.as_deref() == Some(stream_id.as_str()) {
                *room = None;
            }
        }
    }
    remove_from_room(state, peer_id, topic).await;
}

/// Remove every membership a connection holds.
pub async fn unsubscribe_all(state: &AppState, peer_id: &str) {
    let topics: Vec<Topic> = match state.peers.get(peer_id) {
        Some(session) => {
            let drained = session.topics.write().await.drain().collect();
            *session.stream_room.write().await = None;
            drained
        }
        None => return,
    };

    for topic in &topics {
        remove_from_room(state, peer_id, topic).await;
    }
}

/// Membership cleanup for a session already removed from the peer map.
pub async fn drop_memberships(state: &AppState, peer_id: &str, topics: &HashSet<Topic>) {
    for topic in topics {
        remove_from_room(state, peer_id, topic).await;
    }
}

async fn remove_from_room(state: &AppState, peer_id: &str, topic: &Topic) {
    let emptied = match state.rooms.get(topic) {
        Some(room) => {
            let mut subscribers = room.subscribers.write().await;
            subscribers.remove(peer_id);
            subscribers.is_empty()
        }
        None => false,
    };

    if emptied {
        state.rooms.remove_if(topic, |_, room| {
            room.subscribers
                .try_read()
                .map(|s| s.is_empty())
                .unwrap_or(false)
        });
        tracing::debug!(topic = ?topic, "Empty topic group pruned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{test_config, test_peer, test_state};

    #[tokio::test]
    async fn stream_room_rejects_beyond_capacity() {
        let mut config = test_config();
        config.room.max_subscribers = 2;
        let state = test_state(config);

        for id in ["p1", "p2", "p3"] {
            test_peer(&state, id);
        }

        let topic = Topic::Stream("s1".to_string());
        subscribe(&state, "p1", topic.clone()).await.unwrap();
        subscribe(&state, "p2", topic.clone()).await.unwrap();
        assert!(matches!(
            subscribe(&state, "p3", topic.clone()).await,
            Err(AppError::CapacityExceeded)
        ));

        // resubscribing an existing member is not a capacity violation
        subscribe(&state, "p2", topic.clone()).await.unwrap();

        let room = state.rooms.get(&topic).unwrap();
        assert_eq!(room.subscribers.read().await.len(), 2);
    }

    #[tokio::test]
    async fn last_stream_room_subscription_wins() {
        let state = test_state(test_config());
        test_peer(&state, "p1");

        subscribe(&state, "p1", Topic::Stream("s1".to_string()))
            .await
            .unwrap();
        subscribe(&state, "p1", Topic::Stream("s2".to_string()))
            .await
            .unwrap();

        // the old stream room emptied and was pruned
        assert!(!state.rooms.contains_key(&Topic::Stream("s1".to_string())));
        let session = state.peers.get("p1").unwrap();
        assert_eq!(session.stream_room.read().await.as_deref(), Some("s2"));
        assert_eq!(session.topics.read().await.len(), 1);
    }

    #[tokio::test]
    async fn status_room_survives_a_stream_room_switch() {
        let state = test_state(test_config());
        test_peer(&state, "p1");

        subscribe(&state, "p1", Topic::Status).await.unwrap();
        subscribe(&state, "p1", Topic::Stream("s1".to_string()))
            .await
            .unwrap();
        subscribe(&state, "p1", Topic::Stream("s2".to_string()))
            .await
            .unwrap();

        assert!(state.rooms.contains_key(&Topic::Status));
        let session = state.peers.get("p1").unwrap();
        assert_eq!(session.topics.read().await.len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_clears_the_stream_room() {
        let state = test_state(test_config());
        test_peer(&state, "p1");

        let topic = Topic::Stream("s1".to_string());
        subscribe(&state, "p1", topic.clone()).await.unwrap();
        unsubscribe(&state, "p1", &topic).await;

        assert!(!state.rooms.contains_key(&topic));
        let session = state.peers.get("p1").unwrap();
        assert!(session.stream_room.read().await.is_none());
        assert!(session.topics.read().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_all_prunes_emptied_groups() {
        let state = test_state(test_config());
        test_peer(&state, "p1");
        test_peer(&state, "p2");

        subscribe(&state, "p1", Topic::Stream("s1".to_string()))
            .await
            .unwrap();
        subscribe(&state, "p2", Topic::Stream("s1".to_string()))
            .await
            .unwrap();
        subscribe(&state, "p1", Topic::Status).await.unwrap();

        unsubscribe_all(&state, "p1").await;

        // s1 still has p2; the status group emptied and is gone
        assert!(state.rooms.contains_key(&Topic::Stream("s1".to_string())));
        assert!(!state.rooms.contains_key(&Topic::Status));
        let session = state.peers.get("p1").unwrap();
        assert!(session.topics.read().await.is_empty());
    }
}
