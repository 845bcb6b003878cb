//! In-memory stand-ins for the network, yt-dlp and the clock.

use crate::config::Config;
use crate::database::{Channel, Database};
use crate::feed::{FeedEntry, FeedError, FeedSource, ParsedChannel};
use crate::metadata::{MetadataClient, MetadataError, VideoMetadata};
use crate::scheduler::Clock;
use crate::worker::executor::{DownloadError, DownloadExecutor};
use crate::AppState;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Feed entry published on 2024-01-`day`.
pub fn entry(id: &str, title: &str, day: u32) -> FeedEntry {
    let video_id = id.rsplit(':').next().unwrap_or(id);
    FeedEntry {
        id: id.to_string(),
        title: title.to_string(),
        published: Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
        link: Some(format!("https://www.youtube.com/watch?v={}", video_id)),
    }
}

/// Fresh database with each channel subscribed under its own id as name.
pub fn setup_db_with_channels(channel_ids: &[&str]) -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    for id in channel_ids {
        db.subscribe_to_channel(&Channel {
            id: id.to_string(),
            name: id.to_string(),
            subscribed: true,
            image_url: None,
            unwatched_count: 0,
        })
        .unwrap();
    }
    (db, temp_dir)
}

/// App state over a temp database, fake collaborators and a manual clock.
pub fn test_state(feeds: FakeFeedSource, metadata: FakeMetadata) -> (Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::for_tests(temp_dir.path());
    config.validate().unwrap();
    let db = Arc::new(Database::new(&config.database_path).unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
    ));

    let state = AppState::new(
        config,
        db,
        Arc::new(feeds),
        Arc::new(metadata),
        Arc::new(FakeExecutor::succeeding()),
        clock,
    );
    (Arc::new(state), temp_dir)
}

// ============================================================================
// Feeds
// ============================================================================

enum FakeFeed {
    Channel(ParsedChannel),
    Invalid,
    Failure,
}

#[derive(Default)]
pub struct FakeFeedSource {
    feeds: HashMap<String, FakeFeed>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeFeedSource {
    pub fn with_channel(mut self, channel_id: &str, name: &str, entries: Vec<FeedEntry>) -> Self {
        self.feeds.insert(
            channel_id.to_string(),
            FakeFeed::Channel(ParsedChannel {
                channel_id: channel_id.to_string(),
                name: name.to_string(),
                entries,
            }),
        );
        self
    }

    pub fn with_entries(self, channel_id: &str, entries: Vec<FeedEntry>) -> Self {
        self.with_channel(channel_id, channel_id, entries)
    }

    pub fn with_invalid(mut self, channel_id: &str) -> Self {
        self.feeds.insert(channel_id.to_string(), FakeFeed::Invalid);
        self
    }

    pub fn with_failure(mut self, channel_id: &str) -> Self {
        self.feeds.insert(channel_id.to_string(), FakeFeed::Failure);
        self
    }

    pub fn calls(&self, channel_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(channel_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for FakeFeedSource {
    async fn fetch(&self, channel_id: &str) -> Result<ParsedChannel, FeedError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default() += 1;
        // let other fetches interleave, like a real network call would
        tokio::task::yield_now().await;

        match self.feeds.get(channel_id) {
            Some(FakeFeed::Channel(parsed)) => Ok(parsed.clone()),
            Some(FakeFeed::Failure) => Err(FeedError::Status(500)),
            Some(FakeFeed::Invalid) | None => Err(FeedError::InvalidChannel(channel_id.to_string())),
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Default)]
pub struct FakeMetadata {
    durations: HashMap<String, i64>,
    videos: HashMap<String, VideoMetadata>,
    images: HashMap<String, String>,
    failing: bool,
    batch_calls: AtomicUsize,
}

impl FakeMetadata {
    pub fn with_duration(mut self, video_id: &str, seconds: i64) -> Self {
        self.durations.insert(video_id.to_string(), seconds);
        self
    }

    pub fn with_video(mut self, video: VideoMetadata) -> Self {
        self.videos.insert(video.id.clone(), video);
        self
    }

    pub fn with_image(mut self, channel_id: &str, url: &str) -> Self {
        self.images.insert(channel_id.to_string(), url.to_string());
        self
    }

    /// Every request fails as if the API were unavailable.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn unavailable() -> MetadataError {
        MetadataError::Status {
            status: 503,
            body: "backend unavailable".to_string(),
        }
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn batch_durations(&self, ids: &[String]) -> Result<HashMap<String, i64>, MetadataError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.failing {
            return Err(Self::unavailable());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.durations.get(id).map(|d| (id.clone(), *d)))
            .collect())
    }

    async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata, MetadataError> {
        if self.failing {
            return Err(Self::unavailable());
        }
        self.videos
            .get(video_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("video {}", video_id)))
    }

    async fn channel_image_url(&self, channel_id: &str) -> Result<String, MetadataError> {
        if self.failing {
            return Err(Self::unavailable());
        }
        self.images
            .get(channel_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("channel {}", channel_id)))
    }
}

// ============================================================================
// Download executor
// ============================================================================

#[derive(Clone)]
enum ExecutorMode {
    Succeed,
    Fail(String),
    Hang,
}

pub struct FakeExecutor {
    mode: Mutex<ExecutorMode>,
    calls: AtomicUsize,
}

impl FakeExecutor {
    fn with_mode(mode: ExecutorMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
        }
    }

    /// Writes `<id>.mp4` into the output directory.
    pub fn succeeding() -> Self {
        Self::with_mode(ExecutorMode::Succeed)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_mode(ExecutorMode::Fail(message.to_string()))
    }

    /// Leaves `<id>.mp4.part` behind and never finishes until dropped.
    pub fn hanging() -> Self {
        Self::with_mode(ExecutorMode::Hang)
    }

    pub fn set_failure(&self, message: Option<&str>) {
        *self.mode.lock().unwrap() = match message {
            Some(m) => ExecutorMode::Fail(m.to_string()),
            None => ExecutorMode::Succeed,
        };
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadExecutor for FakeExecutor {
    async fn download(
        &self,
        video_id: &str,
        _title: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().unwrap().clone();
        tokio::task::yield_now().await;

        match mode {
            ExecutorMode::Succeed => {
                tokio::fs::create_dir_all(output_dir).await?;
                let path = output_dir.join(format!("{}.mp4", video_id));
                tokio::fs::write(&path, b"fake video").await?;
                Ok(path)
            }
            ExecutorMode::Fail(message) => Err(DownloadError::Exit {
                status: "exit status: 1".to_string(),
                output: message,
            }),
            ExecutorMode::Hang => {
                tokio::fs::create_dir_all(output_dir).await?;
                let partial = output_dir.join(format!("{}.mp4.part", video_id));
                tokio::fs::write(&partial, b"partial").await?;
                std::future::pending().await
            }
        }
    }

    async fn validate_installation(&self) -> Result<(), DownloadError> {
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when slept on.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(duration).unwrap();
        }
        tokio::task::yield_now().await;
    }
}
