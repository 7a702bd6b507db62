//! Livecast live-audio broadcast server

mod broadcast;
mod config;
mod error;
mod handlers;
mod hls;
mod liveness;
mod protocol;
mod state;
mod stats;
mod store;
mod stream;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{Html, IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use config::Config;
use error::AppError;
use futures::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use state::{AppState, OutboundFrame, Topic};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // logging setup
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::new(config.clone()).expect("failed to build application state"));

    // heartbeat scheduler
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(
            heartbeat_state.config.room.heartbeat_interval_ms,
        ));
        loop {
            interval.tick().await;
            liveness::heartbeat_cycle(&heartbeat_state).await;
        }
    });

    // idle connection sweep scheduler
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(
            sweep_state.config.room.sweep_interval_ms,
        ));
        loop {
            interval.tick().await;
            liveness::sweep_idle(&sweep_state).await;
        }
    });

    // stats broadcast scheduler
    let stats_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(
            stats_state.config.room.stats_interval_ms,
        ));
        loop {
            interval.tick().await;
            stats::broadcast_cycle(&stats_state).await;
        }
    });

    // CORS setup
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // router setup
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/streams/:stream_id/start", post(handlers::start_stream))
        .route("/streams/:stream_id/chunks", post(handlers::ingest_chunk))
        .route("/streams/:stream_id/end", post(handlers::end_stream))
        .route(
            "/streams/:stream_id/updated",
            post(handlers::announce_stream_update),
        )
        .route(
            "/streams/:stream_id/playlist.m3u8",
            get(handlers::get_playlist),
        )
        .route("/streams/:stream_id/:filename", get(handlers::get_segment))
        .route("/streams/:stream_id/viewers", post(handlers::join_viewer))
        .route(
            "/streams/:stream_id/viewers/:session_id",
            delete(handlers::kick_viewer),
        )
        .route(
            "/streams/:stream_id/viewers/:session_id/ban",
            post(handlers::ban_viewer),
        )
        .route(
            "/streams/:stream_id/viewers/:session_id/unban",
            post(handlers::unban_viewer),
        )
        .route("/notifications/:user_id", post(handlers::notify_user))
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    tracing::info!("Livecast server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    axum::serve(listener, app).await.unwrap();
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Livecast Server</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "livecast-rs",
        "store": state.store.health().as_str(),
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    // connection setup
    let peer_id = handlers::handle_connection(state.clone(), tx.clone()).await;

    // send task
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Message(msg) => {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                }
                OutboundFrame::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // receive loop
    let state_clone = state.clone();
    let peer_id_clone = peer_id.clone();

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(&state_clone, &peer_id_clone, msg).await,
                Err(_) => {
                    send_error(
                        &state_clone,
                        &peer_id_clone,
                        &AppError::Validation("malformed message".to_string()),
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // teardown
    handlers::handle_disconnect(state, &peer_id).await;
    send_task.abort();
}

async fn handle_client_message(state: &Arc<AppState>, peer_id: &str, msg: ClientMessage) {
    if matches!(msg, ClientMessage::Pong) {
        handlers::record_pong(state, peer_id);
        return;
    }
    handlers::record_activity(state, peer_id).await;

    match msg {
        ClientMessage::Ping => {
            send_to_peer(state, peer_id, ServerMessage::Pong);
        }
        ClientMessage::Pong => {}
        ClientMessage::Subscribe { stream_id } => {
            match handlers::subscribe(state, peer_id, Topic::Stream(stream_id.clone())).await {
                Ok(()) => {
                    // first stats frame so a fresh viewer renders immediately
                    if let Ok(Some(stats)) =
                        store::queries::stream_stats(&state.store, &stream_id).await
                    {
                        send_to_peer(state, peer_id, ServerMessage::Stats { stream_id, stats });
                    }
                }
                Err(e) => send_error(state, peer_id, &e),
            }
        }
        ClientMessage::Unsubscribe => {
            let current = match state.peers.get(peer_id) {
                Some(session) => session.stream_room.read().await.clone(),
                None => None,
            };
            if let Some(stream_id) = current {
                handlers::unsubscribe(state, peer_id, &Topic::Stream(stream_id)).await;
            }
        }
        ClientMessage::SubscribeStreamStatus => {
            if let Err(e) = handlers::subscribe(state, peer_id, Topic::Status).await {
                send_error(state, peer_id, &e);
            }
        }
        ClientMessage::SubscribeNotifications { user_id } => {
            if let Err(e) =
                handlers::subscribe(state, peer_id, Topic::Notifications(user_id)).await
            {
                send_error(state, peer_id, &e);
            }
        }
        ClientMessage::ChatMessage {
            stream_id,
            user_id,
            user_name,
            text,
        } => {
            if let Err(e) =
                broadcast::chat_message(state, &stream_id, user_id, &user_name, &text).await
            {
                send_error(state, peer_id, &e);
            }
        }
    }
}

fn send_to_peer(state: &AppState, peer_id: &str, message: ServerMessage) {
    if let Some(session) = state.peers.get(peer_id) {
        session.send(message);
    }
}

fn send_error(state: &AppState, peer_id: &str, error: &AppError) {
    send_to_peer(
        state,
        peer_id,
        ServerMessage::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        },
    );
}
