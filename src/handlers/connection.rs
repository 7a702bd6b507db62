//! Connection handlers

use crate::protocol::ServerMessage;
use crate::state::{AppState, OutboundFrame, PeerSession};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Register a new connection
pub async fn handle_connection(
    state: Arc<AppState>,
    sender: UnboundedSender<OutboundFrame>,
) -> String {
    let peer_id = Uuid::new_v4().to_string();

    let session = PeerSession::new(peer_id.clone(), sender.clone());
    state.peers.insert(peer_id.clone(), session);

    let _ = sender.send(OutboundFrame::Message(ServerMessage::Connected {
        socket_id: peer_id.clone(),
    }));

    tracing::info!(peer_id = %peer_id, "New connection established");
    peer_id
}

/// Tear a connection down and drop all its topic memberships
pub async fn handle_disconnect(state: Arc<AppState>, peer_id: &str) {
    crate::handlers::rooms::unsubscribe_all(&state, peer_id).await;
    state.peers.remove(peer_id);
    tracing::info!(peer_id = %peer_id, "Connection closed");
}

/// Any substantive inbound frame marks the connection alive and
/// refreshes the idle clock.
pub async fn record_activity(state: &AppState, peer_id: &str) {
    if let Some(session) = state.peers.get(peer_id) {
        session.alive.store(true, Ordering::Relaxed);
        *session.last_activity.write().await = Instant::now();
    }
}

/// Heartbeat replies only mark liveness; the idle clock keeps running
/// so ping-responsive but otherwise silent connections still expire.
pub fn record_pong(state: &AppState, peer_id: &str) {
    if let Some(session) = state.peers.get(peer_id) {
        session.alive.store(true, Ordering::Relaxed);
    }
}
