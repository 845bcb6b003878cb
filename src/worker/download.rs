use super::executor::{remove_partial_files, DownloadError, DownloadExecutor};
use super::TaskRegistry;
use crate::database::{Database, DownloadStatus};
use crate::error::AppError;
use crate::scheduler::Clock;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

const MAX_FILENAME_LEN: usize = 200;

/// A downloaded file ready to be streamed, with the name to present it under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServedFile {
    pub path: PathBuf,
    pub filename: String,
}

/// Drives videos through `none -> pending -> downloading -> completed | failed`.
pub struct DownloadManager {
    db: Arc<Database>,
    executor: Arc<dyn DownloadExecutor>,
    clock: Arc<dyn Clock>,
    downloads_dir: PathBuf,
    tasks: TaskRegistry,
}

impl DownloadManager {
    pub fn new(
        db: Arc<Database>,
        executor: Arc<dyn DownloadExecutor>,
        clock: Arc<dyn Clock>,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            executor,
            clock,
            downloads_dir,
            tasks: TaskRegistry::new(),
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Mark the video pending and start the download in the background.
    ///
    /// Returns as soon as the video is pending; the outcome is only visible
    /// through the stored download status.
    pub async fn download_video(&self, video_id: &str) -> Result<(), AppError> {
        if self.tasks.is_closed() {
            return Err(AppError::Transient("shutting down".to_string()));
        }
        if !self.db.has_video(video_id)? {
            return Err(AppError::NotFound(format!("video {}", video_id)));
        }

        self.db.set_download_status(video_id, DownloadStatus::Pending)?;
        log::info!("Queued download for video {}", video_id);

        let job = DownloadJob {
            db: self.db.clone(),
            executor: self.executor.clone(),
            clock: self.clock.clone(),
            downloads_dir: self.downloads_dir.clone(),
            video_id: video_id.to_string(),
            cancel: self.tasks.cancel_token(),
        };
        self.tasks
            .spawn(&format!("download {}", video_id), job.run());
        Ok(())
    }

    /// Locate the downloaded file for `video_id`.
    ///
    /// A record pointing at a file that no longer exists is cleared so the
    /// video can be downloaded again.
    pub async fn serve_video_file(&self, video_id: &str) -> Result<ServedFile, AppError> {
        let video = self
            .db
            .get_video(video_id)?
            .ok_or_else(|| AppError::NotFound(format!("video {}", video_id)))?;

        let path = match video.file_path {
            Some(path) if video.download_status == DownloadStatus::Completed => PathBuf::from(path),
            _ => return Err(AppError::NotFound(format!("video {} not downloaded", video_id))),
        };

        let exists = tokio::fs::try_exists(&path).await.map_err(|e| {
            log::error!("Failed to check {} for video {}: {}", path.display(), video_id, e);
            AppError::Io(format!("failed to access file for video {}: {}", video_id, e))
        })?;
        if !exists {
            log::warn!(
                "Downloaded file {} for video {} is missing, clearing record",
                path.display(),
                video_id
            );
            if let Err(e) = self.db.clear_download_fields(video_id) {
                log::error!("Failed to clear download record for {}: {:#}", video_id, e);
            }
            return Err(AppError::NotFound(format!(
                "video {} file missing from disk",
                video_id
            )));
        }

        let filename = download_filename(&video.title, video_id, &path);
        Ok(ServedFile { path, filename })
    }

    /// Stop accepting downloads and wait for running ones.
    pub async fn shutdown(&self, grace: std::time::Duration) -> bool {
        self.tasks.shutdown(grace).await
    }
}

struct DownloadJob {
    db: Arc<Database>,
    executor: Arc<dyn DownloadExecutor>,
    clock: Arc<dyn Clock>,
    downloads_dir: PathBuf,
    video_id: String,
    cancel: CancellationToken,
}

impl DownloadJob {
    async fn run(self) {
        let id = self.video_id.as_str();

        let video = match self.db.get_video(id) {
            Ok(Some(video)) => video,
            Ok(None) => {
                log::error!("Video {} disappeared before download", id);
                self.fail("Failed to get video info");
                return;
            }
            Err(e) => {
                log::error!("Failed to get video {} for download: {:#}", id, e);
                self.fail("Failed to get video info");
                return;
            }
        };

        if let Err(e) = self.db.set_download_status(id, DownloadStatus::Downloading) {
            log::error!("Failed to mark video {} as downloading: {:#}", id, e);
            self.fail("Failed to update database");
            return;
        }
        log::info!("Starting download of video {}", id);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.executor.download(id, &video.title, &self.downloads_dir) => result,
        };

        let path = match result {
            Ok(path) => path,
            Err(DownloadError::Cancelled) => {
                log::warn!("Download of video {} cancelled", id);
                remove_partial_files(&self.downloads_dir, id).await;
                self.fail(&DownloadError::Cancelled.to_string());
                return;
            }
            Err(e) => {
                log::error!("Failed to download video {}: {}", id, e);
                self.fail(&e.to_string());
                return;
            }
        };

        let path_str = path.to_string_lossy();
        if let Err(e) = self
            .db
            .set_download_completed(id, &path_str, self.clock.now())
        {
            log::error!("Failed to record download of video {}: {:#}", id, e);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::error!("Failed to remove orphaned file {}: {}", path.display(), e);
            }
            self.fail("Failed to update database");
            return;
        }

        log::info!("Video {} downloaded to {}", id, path.display());
    }

    fn fail(&self, message: &str) {
        if let Err(e) = self.db.set_download_failed(&self.video_id, message) {
            log::error!(
                "Failed to mark video {} as failed: {:#}",
                self.video_id,
                e
            );
        }
    }
}

/// Reduce a title to a filesystem-safe ASCII name.
///
/// Spaces become underscores, everything outside `[A-Za-z0-9_.-]` is dropped,
/// and the result is capped at 200 characters.
pub fn sanitize_filename(title: &str) -> String {
    static DISALLOWED: OnceLock<Option<Regex>> = OnceLock::new();

    let spaced = title.replace(' ', "_");
    let cleaned = match DISALLOWED.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_\-.]").ok()) {
        Some(re) => re.replace_all(&spaced, "").into_owned(),
        None => spaced
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect(),
    };

    let mut name = cleaned.trim_matches(|c| c == '_' || c == '.').to_string();
    name.truncate(MAX_FILENAME_LEN);
    name
}

/// Presentation name for a downloaded file: sanitized title plus the file's extension.
pub fn download_filename(title: &str, video_id: &str, path: &Path) -> String {
    let mut stem = sanitize_filename(title);
    if stem.is_empty() {
        stem = video_id.to_string();
    }
    match path.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}
