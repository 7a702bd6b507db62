//! Connection heartbeats and stale-connection eviction

use crate::handlers::rooms;
use crate::protocol::ServerMessage;
use crate::state::{AppState, OutboundFrame};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One heartbeat cycle. Connections that never came back alive since
/// the previous cycle are force-closed; everyone else gets pinged and
/// has its alive flag cleared for the next round.
pub async fn heartbeat_cycle(state: &Arc<AppState>) {
    let mut doomed = Vec::new();
    for entry in state.peers.iter() {
        if entry.value().alive.swap(false, Ordering::Relaxed) {
            let _ = entry
                .value()
                .sender
                .send(OutboundFrame::Message(ServerMessage::Ping));
        } else {
            doomed.push(entry.key().clone());
        }
    }

    for peer_id in doomed {
        force_close(state, &peer_id).await;
        tracing::info!(peer_id = %peer_id, "Unresponsive connection closed");
    }
}

/// Evict connections with no real activity past the fixed idle
/// timeout, even ones that still answer pings.
pub async fn sweep_idle(state: &Arc<AppState>) {
    let timeout = Duration::from_millis(state.config.room.idle_timeout_ms);
    let now = Instant::now();

    let peer_ids: Vec<String> = state.peers.iter().map(|e| e.key().clone()).collect();
    let mut evicted = 0;
    for peer_id in peer_ids {
        let expired = match state.peers.get(&peer_id) {
            Some(session) => now.duration_since(*session.last_activity.read().await) > timeout,
            None => false,
        };
        if expired {
            force_close(state, &peer_id).await;
            evicted += 1;
        }
    }

    if evicted > 0 {
        tracing::info!(evicted, "Idle connections cleaned up");
    }
}

/// Remove a connection from every topic it belonged to and close its
/// socket.
pub async fn force_close(state: &AppState, peer_id: &str) {
    if let Some((_, session)) = state.peers.remove(peer_id) {
        let _ = session.sender.send(OutboundFrame::Close);
        let topics = session.topics.read().await.clone();
        rooms::drop_memberships(state, peer_id, &topics).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{self, rooms::subscribe};
    use crate::state::test_support::{test_config, test_peer, test_state};
    use crate::state::Topic;

    #[tokio::test]
    async fn silent_connection_is_gone_after_two_cycles() {
        let state = test_state(test_config());
        let mut rx = test_peer(&state, "p1");
        subscribe(&state, "p1", Topic::Stream("s1".to_string()))
            .await
            .unwrap();

        heartbeat_cycle(&state).await;
        assert!(state.peers.contains_key("p1"));
        assert!(matches!(
            rx.try_recv(),
            Ok(OutboundFrame::Message(ServerMessage::Ping))
        ));

        heartbeat_cycle(&state).await;
        assert!(!state.peers.contains_key("p1"));
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Close)));

        // membership is gone and the emptied group was pruned
        assert!(!state.rooms.contains_key(&Topic::Stream("s1".to_string())));
    }

    #[tokio::test]
    async fn pong_keeps_a_connection_alive() {
        let state = test_state(test_config());
        let _rx = test_peer(&state, "p1");

        heartbeat_cycle(&state).await;
        handlers::record_pong(&state, "p1");
        heartbeat_cycle(&state).await;

        assert!(state.peers.contains_key("p1"));
    }

    #[tokio::test]
    async fn idle_timeout_evicts_even_responsive_connections() {
        let mut config = test_config();
        config.room.idle_timeout_ms = 1;
        let state = test_state(config);
        let mut rx = test_peer(&state, "p1");

        tokio::time::sleep(Duration::from_millis(10)).await;
        // a heartbeat reply marks it alive but does not count as activity
        handlers::record_pong(&state, "p1");
        sweep_idle(&state).await;

        assert!(!state.peers.contains_key("p1"));
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Close)));
    }

    #[tokio::test]
    async fn activity_resets_the_idle_clock() {
        let mut config = test_config();
        config.room.idle_timeout_ms = 60000;
        let state = test_state(config);
        let _rx = test_peer(&state, "p1");

        handlers::record_activity(&state, "p1").await;
        sweep_idle(&state).await;

        assert!(state.peers.contains_key("p1"));
    }
}
