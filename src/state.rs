//! Application state management

use crate::config::Config;
use crate::hls::SegmentStore;
use crate::protocol::ServerMessage;
use crate::store::StorePool;
use crate::stream::StreamEntry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, RwLock};
use tokio::task::JoinHandle;

/// Fan-out group key. A connection holds at most one `Stream` topic at
/// a time; `Status` and `Notifications` subscriptions are independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Stream(String),
    Status,
    Notifications(uuid::Uuid),
}

/// Frame pushed into a connection's outbound channel. `Close` makes the
/// send task emit a close frame and drop the socket.
#[derive(Debug)]
pub enum OutboundFrame {
    Message(ServerMessage),
    Close,
}

/// Global application state
pub struct AppState {
    /// Topic membership (topic -> Room)
    pub rooms: DashMap<Topic, Room>,
    /// Live connections (peer_id -> PeerSession)
    pub peers: DashMap<String, PeerSession>,
    /// Active stream lifecycle entries (stream_id -> StreamEntry)
    pub streams: DashMap<String, StreamEntry>,
    /// Pending delayed-purge timers (stream_id -> handle)
    pub purge_timers: DashMap<String, JoinHandle<()>>,
    /// Segment window and manifest storage
    pub segments: SegmentStore,
    /// Resilient persistent-store pool
    pub store: StorePool,
    /// Settings
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let segments = SegmentStore::new(&config.stream);
        let store = StorePool::new(config.db.clone())?;

        Ok(Self {
            rooms: DashMap::new(),
            peers: DashMap::new(),
            streams: DashMap::new(),
            purge_timers: DashMap::new(),
            segments,
            store,
            config: Arc::new(config),
        })
    }
}

/// One topic's subscriber group
pub struct Room {
    pub subscribers: RwLock<HashSet<String>>,
    #[allow(dead_code)]
    pub created_at: Instant,
}

impl Room {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashSet::new()),
            created_at: Instant::now(),
        }
    }
}

/// Per-connection session state
pub struct PeerSession {
    #[allow(dead_code)]
    pub id: String,
    pub sender: UnboundedSender<OutboundFrame>,
    /// Cleared each heartbeat cycle; set again by any inbound frame.
    pub alive: AtomicBool,
    /// Heartbeat replies do not refresh this; the idle timeout bounds
    /// connection lifetime even for ping-responsive clients.
    pub last_activity: RwLock<Instant>,
    /// The single stream room this connection is in, if any.
    pub stream_room: RwLock<Option<String>>,
    /// All topics this connection belongs to.
    pub topics: RwLock<HashSet<Topic>>,
    #[allow(dead_code)]
    pub connected_at: Instant,
}

impl PeerSession {
    pub fn new(id: String, sender: UnboundedSender<OutboundFrame>) -> Self {
        Self {
            id,
            sender,
            alive: AtomicBool::new(true),
            last_activity: RwLock::new(Instant::now()),
            stream_room: RwLock::new(None),
            topics: RwLock::new(HashSet::new()),
            connected_at: Instant::now(),
        }
    }

    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(OutboundFrame::Message(message)).is_ok()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::config::{DbConfig, RoomConfig, StreamConfig};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    pub fn test_config() -> Config {
        Config {
            port: 0,
            host: "127.0.0.1".to_string(),
            cors_origins: vec![],
            stream: StreamConfig {
                data_dir: std::env::temp_dir()
                    .join(format!("livecast-state-{}", uuid::Uuid::new_v4())),
                segment_duration: 10.0,
                max_segments: 4,
                purge_delay_ms: 60000,
            },
            room: RoomConfig {
                max_subscribers: 8,
                heartbeat_interval_ms: 30000,
                sweep_interval_ms: 60000,
                idle_timeout_ms: 300000,
                stats_interval_ms: 3000,
            },
            db: DbConfig {
                // port 1 refuses immediately; nothing listens there
                url: "postgres://postgres@127.0.0.1:1/livecast_test".to_string(),
                max_connections: 2,
                reconnect_max_attempts: 2,
                reconnect_base_ms: 1,
                reconnect_max_ms: 2,
            },
            log_level: "info".to_string(),
        }
    }

    pub fn test_state(config: Config) -> Arc<AppState> {
        Arc::new(AppState::new(config).unwrap())
    }

    /// Registers a fake connection and hands back its outbound channel.
    pub fn test_peer(state: &AppState, peer_id: &str) -> UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .peers
            .insert(peer_id.to_string(), PeerSession::new(peer_id.to_string(), tx));
        rx
    }
}
