use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Prefer VP9/AV1 up to 1080p, then anything up to 1080p, then anything.
const YTDLP_FORMAT: &str = "bestvideo[height<=1080][vcodec^=vp9]+bestaudio/bestvideo[height<=1080][vcodec^=av01]+bestaudio/bestvideo[height<=1080]+bestaudio/best[height<=1080]/best";

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to run yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("yt-dlp failed with {status}: {output}")]
    Exit { status: String, output: String },

    #[error("downloaded file not found")]
    FileNotFound,

    #[error("download cancelled")]
    Cancelled,

    #[error("yt-dlp is not installed or not executable: {0}")]
    NotInstalled(String),
}

/// Fetches a video to local storage.
#[async_trait]
pub trait DownloadExecutor: Send + Sync {
    /// Download `video_id` into `output_dir`, returning the written file.
    async fn download(
        &self,
        video_id: &str,
        title: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, DownloadError>;

    async fn validate_installation(&self) -> Result<(), DownloadError>;
}

pub struct YtDlpExecutor {
    binary: PathBuf,
}

impl Default for YtDlpExecutor {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpExecutor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl DownloadExecutor for YtDlpExecutor {
    async fn download(
        &self,
        video_id: &str,
        title: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let template = output_dir.join(format!("{}.%(ext)s", video_id));
        let url = format!("{}{}", WATCH_URL, video_id);
        log::info!("Downloading {} ({}) with yt-dlp", video_id, title);

        // kill_on_drop: a cancelled download must not leave yt-dlp running
        let output = Command::new(&self.binary)
            .arg("--output")
            .arg(&template)
            .args([
                "--format",
                YTDLP_FORMAT,
                "--no-playlist",
                "--no-warnings",
                "--quiet",
                "--progress",
            ])
            .arg(&url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout);
            if combined.is_empty() {
                combined = stdout.trim().to_string();
            }
            return Err(DownloadError::Exit {
                status: output.status.to_string(),
                output: combined,
            });
        }

        find_downloaded_file(output_dir, video_id)
            .await?
            .ok_or(DownloadError::FileNotFound)
    }

    async fn validate_installation(&self) -> Result<(), DownloadError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DownloadError::NotInstalled(e.to_string()))?;

        if !output.status.success() {
            return Err(DownloadError::NotInstalled(format!(
                "--version exited with {}",
                output.status
            )));
        }

        log::info!(
            "Found yt-dlp {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }
}

/// First completed `{video_id}.*` file in `dir`. Partial downloads are ignored.
pub async fn find_downloaded_file(dir: &Path, video_id: &str) -> std::io::Result<Option<PathBuf>> {
    let prefix = format!("{}.", video_id);
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Ok(Some(entry.path()));
        }
    }

    Ok(None)
}

/// Delete every `{video_id}.*` file left in `dir` by an interrupted download.
pub async fn remove_partial_files(dir: &Path, video_id: &str) {
    let prefix = format!("{}.", video_id);
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Failed to list {} for leftovers: {}", dir.display(), e);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to list {} for leftovers: {}", dir.display(), e);
                break;
            }
        };
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        if let Err(e) = tokio::fs::remove_file(&path).await {
            log::warn!("Failed to remove leftover {}: {}", path.display(), e);
        }
    }
}
