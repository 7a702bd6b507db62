//! Per-stream segment windows and playlist rendering

use crate::config::StreamConfig;
use crate::error::AppError;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

pub const MANIFEST_FILENAME: &str = "playlist.m3u8";
const END_MARKER: &str = "#EXT-X-ENDLIST";

/// One chunk of audio in the playable window
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u64,
    pub filename: String,
    pub duration: f64,
}

/// Bounded ordered window of segments for one live stream
#[derive(Debug)]
pub struct StreamWindow {
    /// Next index to assign; also the total number of segments ever produced.
    pub segment_index: u64,
    pub segments: VecDeque<Segment>,
}

impl StreamWindow {
    fn new() -> Self {
        Self {
            segment_index: 0,
            segments: VecDeque::new(),
        }
    }

    /// Index of the first segment still listed in the manifest.
    pub fn media_sequence(&self) -> u64 {
        self.segment_index - self.segments.len() as u64
    }
}

/// Segment and manifest storage for all active streams
pub struct SegmentStore {
    streams: RwLock<HashMap<String, StreamWindow>>,
    base_dir: PathBuf,
    segment_duration: f64,
    max_segments: usize,
}

impl SegmentStore {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            base_dir: config.data_dir.clone(),
            segment_duration: config.segment_duration,
            max_segments: config.max_segments,
        }
    }

    pub fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.base_dir.join(stream_id)
    }

    pub fn manifest_path(&self, stream_id: &str) -> PathBuf {
        self.stream_dir(stream_id).join(MANIFEST_FILENAME)
    }

    /// Initialize an empty window and write the header-only manifest.
    pub async fn start(&self, stream_id: &str) -> Result<(), AppError> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(stream_id) {
            return Err(AppError::StateConflict);
        }

        fs::create_dir_all(self.stream_dir(stream_id)).await?;

        let window = StreamWindow::new();
        let manifest = render_manifest(&window, self.segment_duration);
        fs::write(self.manifest_path(stream_id), manifest).await?;

        streams.insert(stream_id.to_string(), window);
        tracing::info!(stream_id = %stream_id, "Segment window initialized");
        Ok(())
    }

    /// Store one chunk, rotate the window, and regenerate the manifest.
    /// Returns the index assigned to the new segment.
    pub async fn append(&self, stream_id: &str, data: &[u8]) -> Result<u64, AppError> {
        let mut streams = self.streams.write().await;
        let window = streams.get_mut(stream_id).ok_or(AppError::NotActive)?;

        let index = window.segment_index;
        let filename = format!("segment{index}.ts");
        let dir = self.base_dir.join(stream_id);

        fs::write(dir.join(&filename), data).await?;
        // The index advances only after the artifact write succeeded,
        // keeping the assigned sequence gapless.
        window.segment_index += 1;
        window.segments.push_back(Segment {
            index,
            filename,
            duration: self.segment_duration,
        });

        if window.segments.len() > self.max_segments {
            if let Some(old) = window.segments.pop_front() {
                let _ = fs::remove_file(dir.join(&old.filename)).await;
                tracing::debug!(stream_id = %stream_id, index = old.index, "Evicted segment");
            }
        }

        let manifest = render_manifest(window, self.segment_duration);
        fs::write(dir.join(MANIFEST_FILENAME), manifest).await?;

        Ok(index)
    }

    /// Append the end marker and drop the in-memory window. Artifacts
    /// stay on disk until `purge`.
    pub async fn end(&self, stream_id: &str) -> Result<(), AppError> {
        let mut streams = self.streams.write().await;
        streams.remove(stream_id).ok_or(AppError::NotActive)?;

        let path = self.manifest_path(stream_id);
        let mut content = fs::read_to_string(&path).await?;
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(END_MARKER);
        content.push('\n');
        fs::write(&path, content).await?;

        tracing::info!(stream_id = %stream_id, "Stream ended, manifest finalized");
        Ok(())
    }

    /// Delete all on-disk artifacts for a stream. Idempotent.
    pub async fn purge(&self, stream_id: &str) -> Result<(), AppError> {
        self.streams.write().await.remove(stream_id);

        let dir = self.stream_dir(stream_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(stream_id = %stream_id, "Stream artifacts purged");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

}

/// Only names the store itself assigns are servable; anything else
/// (traversal attempts included) is rejected at the route layer.
pub fn is_segment_filename(name: &str) -> bool {
    name.strip_prefix("segment")
        .and_then(|rest| rest.strip_suffix(".ts"))
        .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
}

fn render_manifest(window: &StreamWindow, target_duration: f64) -> String {
    let mut manifest = String::new();
    manifest.push_str("#EXTM3U\n");
    manifest.push_str("#EXT-X-VERSION:3\n");
    manifest.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        target_duration.ceil() as u32
    ));
    manifest.push_str(&format!(
        "#EXT-X-MEDIA-SEQUENCE:{}\n",
        window.media_sequence()
    ));

    for segment in &window.segments {
        manifest.push_str(&format!("#EXTINF:{:.3},\n", segment.duration));
        manifest.push_str(&segment.filename);
        manifest.push('\n');
    }

    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_store(max_segments: usize) -> SegmentStore {
        let config = StreamConfig {
            data_dir: std::env::temp_dir().join(format!("livecast-hls-{}", uuid::Uuid::new_v4())),
            segment_duration: 10.0,
            max_segments,
            purge_delay_ms: 0,
        };
        SegmentStore::new(&config)
    }

    #[tokio::test]
    async fn start_writes_header_only_manifest() {
        let store = test_store(6);
        store.start("s1").await.unwrap();

        let manifest = fs::read_to_string(store.manifest_path("s1")).await.unwrap();
        assert!(manifest.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(manifest.contains("#EXT-X-TARGETDURATION:10\n"));
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
        assert!(!manifest.contains("#EXTINF"));

        store.purge("s1").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_start_is_a_conflict() {
        let store = test_store(6);
        store.start("s1").await.unwrap();
        assert!(matches!(
            store.start("s1").await,
            Err(AppError::StateConflict)
        ));
        store.purge("s1").await.unwrap();
    }

    #[tokio::test]
    async fn append_without_start_is_rejected() {
        let store = test_store(6);
        assert!(matches!(
            store.append("missing", b"audio").await,
            Err(AppError::NotActive)
        ));
    }

    #[tokio::test]
    async fn window_keeps_only_the_most_recent_segments() {
        let store = test_store(2);
        store.start("s1").await.unwrap();

        for i in 0..3u8 {
            store.append("s1", &[i]).await.unwrap();
        }

        let manifest = fs::read_to_string(store.manifest_path("s1")).await.unwrap();
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:1\n"));
        assert!(!manifest.contains("segment0.ts"));
        assert!(manifest.contains("segment1.ts"));
        assert!(manifest.contains("segment2.ts"));

        // evicted artifact is dropped from disk, retained ones are not
        assert!(!store.stream_dir("s1").join("segment0.ts").exists());
        assert!(store.stream_dir("s1").join("segment1.ts").exists());

        store.purge("s1").await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_start_ingest_end_purge() {
        let store = test_store(6);
        store.start("s1").await.unwrap();
        for i in 0..3u8 {
            let index = store.append("s1", &[i]).await.unwrap();
            assert_eq!(index, i as u64);
        }

        let manifest = fs::read_to_string(store.manifest_path("s1")).await.unwrap();
        assert_eq!(manifest.matches("#EXTINF:10.000,").count(), 3);
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));

        store.end("s1").await.unwrap();
        let manifest = fs::read_to_string(store.manifest_path("s1")).await.unwrap();
        assert_eq!(manifest.matches(END_MARKER).count(), 1);

        // window is gone; further ingest and a second end are rejected
        assert!(matches!(
            store.append("s1", b"late").await,
            Err(AppError::NotActive)
        ));
        assert!(matches!(store.end("s1").await, Err(AppError::NotActive)));

        store.purge("s1").await.unwrap();
        assert!(!store.stream_dir("s1").exists());
        store.purge("s1").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_appends_assign_gapless_indices() {
        let store = Arc::new(test_store(16));
        store.start("s1").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let store = store.clone();
            tasks.push(tokio::spawn(
                async move { store.append("s1", &[i]).await },
            ));
        }

        let mut indices = Vec::new();
        for task in tasks {
            indices.push(task.await.unwrap().unwrap());
        }
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<u64>>());

        store.purge("s1").await.unwrap();
    }

    #[test]
    fn segment_filename_validation() {
        assert!(is_segment_filename("segment0.ts"));
        assert!(is_segment_filename("segment12345.ts"));
        assert!(!is_segment_filename("segment.ts"));
        assert!(!is_segment_filename("segment0.mp3"));
        assert!(!is_segment_filename("../etc/passwd"));
        assert!(!is_segment_filename("playlist.m3u8"));
    }
}
