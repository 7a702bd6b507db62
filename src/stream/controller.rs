//! Per-stream state machine: NotStarted -> Live -> Ending -> Purged
//!
//! NotStarted and Purged streams have no entry; `streams` holds only
//! Live and Ending entries, so ingest/join/stats are deterministically
//! rejected once a stream leaves Live.

use crate::broadcast;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::queries;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Live,
    Ending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    AlreadyEnded,
}

/// Lifecycle state for one stream
pub struct StreamEntry {
    pub phase: StreamPhase,
    #[allow(dead_code)]
    pub started_at: Instant,
    pub viewers: HashMap<String, ViewerSession>,
    pub peak_viewers: usize,
}

impl StreamEntry {
    fn new() -> Self {
        Self {
            phase: StreamPhase::Live,
            started_at: Instant::now(),
            viewers: HashMap::new(),
            peak_viewers: 0,
        }
    }

    pub fn active_viewers(&self) -> usize {
        self.viewers.values().filter(|v| !v.banned).count()
    }
}

/// One viewer's presence on a stream. Banned sessions stay in the map
/// so the ban survives until an explicit unban.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerSession {
    pub session_id: String,
    pub stream_id: String,
    pub name: String,
    pub location: Option<String>,
    pub user_id: Option<Uuid>,
    pub banned: bool,
}

#[derive(Debug, Deserialize)]
pub struct JoinViewerRequest {
    pub name: String,
    pub location: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub manifest_url: String,
    pub chunk_upload_url: String,
}

pub(crate) fn validate_stream_id(stream_id: &str) -> Result<(), AppError> {
    let ok = !stream_id.is_empty()
        && stream_id.len() <= 64
        && stream_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation("invalid stream id".to_string()))
    }
}

/// NotStarted -> Live. Cancels a pending purge when the same stream id
/// is re-created during the grace period, then starts from a clean slate.
pub async fn create(state: &Arc<AppState>, stream_id: &str) -> Result<StartResponse, AppError> {
    validate_stream_id(stream_id)?;

    if let Some((_, handle)) = state.purge_timers.remove(stream_id) {
        handle.abort();
        tracing::info!(stream_id = %stream_id, "Pending purge cancelled by re-create");
    }

    let ending = match state.streams.get(stream_id) {
        Some(entry) if entry.phase == StreamPhase::Live => return Err(AppError::StateConflict),
        Some(_) => true,
        None => false,
    };
    if ending {
        state.segments.purge(stream_id).await?;
        state.streams.remove(stream_id);
    }

    state.segments.start(stream_id).await?;
    state.streams.insert(stream_id.to_string(), StreamEntry::new());

    if let Err(e) = queries::mark_live(&state.store, stream_id).await {
        tracing::warn!(stream_id = %stream_id, error = %e, "Store mark-live failed");
    }
    broadcast::stream_status_changed(state).await;

    tracing::info!(stream_id = %stream_id, "Stream is live");
    Ok(StartResponse {
        manifest_url: format!("/streams/{stream_id}/playlist.m3u8"),
        chunk_upload_url: format!("/streams/{stream_id}/chunks"),
    })
}

/// Valid only while Live; delegates index assignment and window
/// rotation to the segment store.
pub async fn ingest_chunk(
    state: &Arc<AppState>,
    stream_id: &str,
    data: &[u8],
) -> Result<u64, AppError> {
    if data.is_empty() {
        return Err(AppError::Validation("empty chunk".to_string()));
    }
    {
        let entry = state.streams.get(stream_id).ok_or(AppError::NotActive)?;
        if entry.phase != StreamPhase::Live {
            return Err(AppError::NotActive);
        }
    }
    state.segments.append(stream_id, data).await
}

/// Live -> Ending, with a delayed purge. A no-op on anything but Live.
pub async fn end(state: &Arc<AppState>, stream_id: &str) -> Result<EndOutcome, AppError> {
    let counts = {
        let mut entry = match state.streams.get_mut(stream_id) {
            Some(entry) => entry,
            None => return Ok(EndOutcome::AlreadyEnded),
        };
        if entry.phase != StreamPhase::Live {
            return Ok(EndOutcome::AlreadyEnded);
        }
        entry.phase = StreamPhase::Ending;
        (entry.active_viewers() as i64, entry.peak_viewers as i64)
    };

    state.segments.end(stream_id).await?;

    if let Err(e) = queries::mark_ended(&state.store, stream_id, counts.0, counts.1).await {
        tracing::warn!(stream_id = %stream_id, error = %e, "Store mark-ended failed");
    }
    broadcast::stream_status_changed(state).await;
    schedule_purge(state, stream_id);

    tracing::info!(stream_id = %stream_id, "Stream ended, purge scheduled");
    Ok(EndOutcome::Ended)
}

fn schedule_purge(state: &Arc<AppState>, stream_id: &str) {
    let delay = Duration::from_millis(state.config.stream.purge_delay_ms);
    let task_state = state.clone();
    let id = stream_id.to_string();

    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        purge_now(&task_state, &id).await;
    });

    if let Some(old) = state.purge_timers.insert(stream_id.to_string(), handle) {
        old.abort();
    }
}

/// Ending -> Purged. Skipped if the stream went Live again in the
/// meantime, so a stale timer can never delete fresh artifacts.
pub async fn purge_now(state: &Arc<AppState>, stream_id: &str) {
    if let Some(entry) = state.streams.get(stream_id) {
        if entry.phase == StreamPhase::Live {
            return;
        }
    }

    if let Err(e) = state.segments.purge(stream_id).await {
        tracing::warn!(stream_id = %stream_id, error = %e, "Purge failed");
    }
    state.streams.remove(stream_id);
    state.purge_timers.remove(stream_id);
}

/// Register a viewer on a live stream. Rejects banned users; reuses the
/// caller's existing session on a rejoin.
pub async fn join_viewer(
    state: &Arc<AppState>,
    stream_id: &str,
    request: JoinViewerRequest,
) -> Result<ViewerSession, AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::Validation("viewer name is required".to_string()));
    }

    let (session, counts) = {
        let mut entry = state.streams.get_mut(stream_id).ok_or(AppError::NotActive)?;
        if entry.phase != StreamPhase::Live {
            return Err(AppError::NotActive);
        }

        if let Some(user_id) = request.user_id {
            if entry
                .viewers
                .values()
                .any(|v| v.user_id == Some(user_id) && v.banned)
            {
                return Err(AppError::Validation(
                    "viewer is banned from this stream".to_string(),
                ));
            }
            if let Some(existing) = entry
                .viewers
                .values()
                .find(|v| v.user_id == Some(user_id))
                .cloned()
            {
                return Ok(existing);
            }
        }

        let session = ViewerSession {
            session_id: Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            name: request.name.trim().to_string(),
            location: request.location,
            user_id: request.user_id,
            banned: false,
        };
        entry
            .viewers
            .insert(session.session_id.clone(), session.clone());

        let active = entry.active_viewers();
        if active > entry.peak_viewers {
            entry.peak_viewers = active;
        }
        (session, (active as i64, entry.peak_viewers as i64))
    };

    sync_viewer_counts(state, stream_id, counts).await;
    Ok(session)
}

/// Drop a viewer session. The kicked signal carries only the user id;
/// actual credential invalidation happens upstream.
pub async fn kick_viewer(
    state: &Arc<AppState>,
    stream_id: &str,
    session_id: &str,
) -> Result<(), AppError> {
    let (kicked_user, counts) = {
        let mut entry = state.streams.get_mut(stream_id).ok_or(AppError::NotActive)?;
        let session = entry
            .viewers
            .remove(session_id)
            .ok_or_else(|| AppError::Validation("unknown viewer session".to_string()))?;
        (
            session.user_id,
            (entry.active_viewers() as i64, entry.peak_viewers as i64),
        )
    };

    if let Some(user_id) = kicked_user {
        broadcast::viewer_kicked(state, user_id).await;
    }
    sync_viewer_counts(state, stream_id, counts).await;
    Ok(())
}

/// Idempotent ban/unban tag flip on a viewer session.
pub async fn set_viewer_banned(
    state: &Arc<AppState>,
    stream_id: &str,
    session_id: &str,
    banned: bool,
) -> Result<ViewerSession, AppError> {
    let (session, counts) = {
        let mut entry = state.streams.get_mut(stream_id).ok_or(AppError::NotActive)?;
        let viewer = entry
            .viewers
            .get_mut(session_id)
            .ok_or_else(|| AppError::Validation("unknown viewer session".to_string()))?;
        viewer.banned = banned;
        let session = viewer.clone();
        (
            session,
            (entry.active_viewers() as i64, entry.peak_viewers as i64),
        )
    };

    sync_viewer_counts(state, stream_id, counts).await;
    Ok(session)
}

async fn sync_viewer_counts(state: &Arc<AppState>, stream_id: &str, counts: (i64, i64)) {
    if let Err(e) = queries::update_viewer_counts(&state.store, stream_id, counts.0, counts.1).await
    {
        tracing::warn!(stream_id = %stream_id, error = %e, "Viewer count sync failed");
    }
    broadcast::viewers_updated(state).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::MANIFEST_FILENAME;
    use crate::state::test_support;

    fn test_state(purge_delay_ms: u64) -> Arc<AppState> {
        let mut config = test_support::test_config();
        config.stream.data_dir =
            std::env::temp_dir().join(format!("livecast-ctl-{}", Uuid::new_v4()));
        config.stream.purge_delay_ms = purge_delay_ms;
        test_support::test_state(config)
    }

    fn join_request(name: &str, user_id: Option<Uuid>) -> JoinViewerRequest {
        JoinViewerRequest {
            name: name.to_string(),
            location: None,
            user_id,
        }
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let state = test_state(60000);
        create(&state, "s1").await.unwrap();
        assert!(matches!(
            create(&state, "s1").await,
            Err(AppError::StateConflict)
        ));
        purge_now(&state, "s1").await;
    }

    #[tokio::test]
    async fn ingest_is_rejected_outside_live() {
        let state = test_state(60000);
        assert!(matches!(
            ingest_chunk(&state, "s1", b"audio").await,
            Err(AppError::NotActive)
        ));

        create(&state, "s1").await.unwrap();
        ingest_chunk(&state, "s1", b"audio").await.unwrap();

        end(&state, "s1").await.unwrap();
        assert!(matches!(
            ingest_chunk(&state, "s1", b"audio").await,
            Err(AppError::NotActive)
        ));
        purge_now(&state, "s1").await;
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let state = test_state(60000);
        create(&state, "s1").await.unwrap();
        ingest_chunk(&state, "s1", b"audio").await.unwrap();

        assert_eq!(end(&state, "s1").await.unwrap(), EndOutcome::Ended);
        assert_eq!(end(&state, "s1").await.unwrap(), EndOutcome::AlreadyEnded);
        assert_eq!(end(&state, "missing").await.unwrap(), EndOutcome::AlreadyEnded);

        // a single end marker and a single pending purge
        let manifest = tokio::fs::read_to_string(
            state.segments.stream_dir("s1").join(MANIFEST_FILENAME),
        )
        .await
        .unwrap();
        assert_eq!(manifest.matches("#EXT-X-ENDLIST").count(), 1);
        assert_eq!(state.purge_timers.len(), 1);

        purge_now(&state, "s1").await;
    }

    #[tokio::test]
    async fn purge_runs_after_grace_period() {
        let state = test_state(20);
        create(&state, "s1").await.unwrap();
        ingest_chunk(&state, "s1", b"audio").await.unwrap();
        end(&state, "s1").await.unwrap();

        assert!(state.segments.stream_dir("s1").exists());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!state.segments.stream_dir("s1").exists());
        assert!(!state.streams.contains_key("s1"));
        assert!(!state.purge_timers.contains_key("s1"));
    }

    #[tokio::test]
    async fn recreate_during_grace_cancels_purge() {
        let state = test_state(60000);
        create(&state, "s1").await.unwrap();
        end(&state, "s1").await.unwrap();
        assert!(state.purge_timers.contains_key("s1"));

        create(&state, "s1").await.unwrap();
        assert!(!state.purge_timers.contains_key("s1"));

        // the new incarnation is live with a fresh window
        let index = ingest_chunk(&state, "s1", b"audio").await.unwrap();
        assert_eq!(index, 0);
        purge_now(&state, "s1").await;
    }

    #[tokio::test]
    async fn banned_viewer_cannot_rejoin_until_unbanned() {
        let state = test_state(60000);
        create(&state, "s1").await.unwrap();

        let user_id = Uuid::new_v4();
        let session = join_viewer(&state, "s1", join_request("ada", Some(user_id)))
            .await
            .unwrap();

        set_viewer_banned(&state, "s1", &session.session_id, true)
            .await
            .unwrap();
        assert!(matches!(
            join_viewer(&state, "s1", join_request("ada", Some(user_id))).await,
            Err(AppError::Validation(_))
        ));
        // ban is idempotent
        set_viewer_banned(&state, "s1", &session.session_id, true)
            .await
            .unwrap();

        set_viewer_banned(&state, "s1", &session.session_id, false)
            .await
            .unwrap();
        let rejoined = join_viewer(&state, "s1", join_request("ada", Some(user_id)))
            .await
            .unwrap();
        assert_eq!(rejoined.session_id, session.session_id);

        purge_now(&state, "s1").await;
    }

    #[tokio::test]
    async fn kick_removes_the_session_and_peak_survives() {
        let state = test_state(60000);
        create(&state, "s1").await.unwrap();

        let a = join_viewer(&state, "s1", join_request("ada", Some(Uuid::new_v4())))
            .await
            .unwrap();
        join_viewer(&state, "s1", join_request("grace", None))
            .await
            .unwrap();

        kick_viewer(&state, "s1", &a.session_id).await.unwrap();

        let entry = state.streams.get("s1").unwrap();
        assert_eq!(entry.active_viewers(), 1);
        assert_eq!(entry.peak_viewers, 2);
        drop(entry);

        assert!(matches!(
            kick_viewer(&state, "s1", &a.session_id).await,
            Err(AppError::Validation(_))
        ));
        purge_now(&state, "s1").await;
    }
}
