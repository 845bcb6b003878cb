use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    None,
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self::None
    }
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub subscribed: bool,
    pub image_url: Option<String>,
    pub unwatched_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub watch_time: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub progress_seconds: i64,
    pub is_short: bool,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
    pub download_status: DownloadStatus,
    pub download_error: Option<String>,
}

impl Video {
    /// Saved progress as a whole percentage of the duration, clamped to 0..=100.
    pub fn progress_percentage(&self) -> i64 {
        if self.duration_seconds <= 0 {
            return 0;
        }
        let percent = i128::from(self.progress_seconds) * 100 / i128::from(self.duration_seconds);
        percent.clamp(0, 100) as i64
    }

    /// Duration as `hh:mm:ss`, or `mm:ss` when shorter than an hour.
    pub fn formatted_duration(&self) -> String {
        let total = self.duration_seconds.max(0);
        let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
        if h > 0 {
            format!("{:02}:{:02}:{:02}", h, m, s)
        } else {
            format!("{:02}:{:02}", m, s)
        }
    }
}

/// A video staged for insertion, before it has a row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideo {
    pub id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub is_short: bool,
}

/// One page of the watched-videos listing.
#[derive(Debug, Clone, Serialize)]
pub struct VideoPage {
    pub videos: Vec<Video>,
    pub next_page: Option<u32>,
}
