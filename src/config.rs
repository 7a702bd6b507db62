//! Environment-driven configuration

use std::env;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    #[allow(dead_code)]
    pub cors_origins: Vec<String>,
    pub stream: StreamConfig,
    pub room: RoomConfig,
    pub db: DbConfig,
    pub log_level: String,
}

/// Segment window and artifact settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub data_dir: PathBuf,
    /// Nominal duration of one ingested chunk, seconds.
    pub segment_duration: f64,
    /// Sliding-window capacity; oldest segments beyond it are evicted.
    pub max_segments: usize,
    /// Grace period between end-of-stream and artifact deletion.
    pub purge_delay_ms: u64,
}

/// Room and liveness settings
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub max_subscribers: usize,
    pub heartbeat_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub stats_interval_ms: u64,
}

/// Persistent store settings
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: usize,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "5500".to_string())
                .parse()
                .unwrap_or(5500),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            stream: StreamConfig {
                data_dir: PathBuf::from(
                    env::var("STREAM_DATA_DIR").unwrap_or_else(|_| "./data/streams".to_string()),
                ),
                segment_duration: env::var("SEGMENT_DURATION")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10.0),
                max_segments: env::var("MAX_SEGMENTS")
                    .unwrap_or_else(|_| "6".to_string())
                    .parse()
                    .unwrap_or(6),
                purge_delay_ms: env::var("STREAM_PURGE_DELAY")
                    .unwrap_or_else(|_| "60000".to_string())
                    .parse()
                    .unwrap_or(60000),
            },
            room: RoomConfig {
                max_subscribers: env::var("MAX_ROOM_SUBSCRIBERS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
                heartbeat_interval_ms: env::var("HEARTBEAT_INTERVAL")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30000),
                sweep_interval_ms: env::var("SWEEP_INTERVAL")
                    .unwrap_or_else(|_| "60000".to_string())
                    .parse()
                    .unwrap_or(60000),
                idle_timeout_ms: env::var("CONNECTION_IDLE_TIMEOUT")
                    .unwrap_or_else(|_| "300000".to_string())
                    .parse()
                    .unwrap_or(300000),
                stats_interval_ms: env::var("STATS_INTERVAL")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            db: DbConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/livecast".to_string()),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
                reconnect_max_attempts: env::var("DB_RECONNECT_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                reconnect_base_ms: env::var("DB_RECONNECT_BASE_DELAY")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
                reconnect_max_ms: env::var("DB_RECONNECT_MAX_DELAY")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30000),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
