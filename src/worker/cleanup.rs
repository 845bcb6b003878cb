//! Removes downloaded files for videos watched long enough ago.

use crate::database::Database;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub candidates: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Delete files of completed downloads watched before `now - max_age`.
///
/// Each video is handled on its own: a failure is logged and the sweep moves
/// on. A file that is already gone still gets its record cleared.
pub async fn perform_cleanup(
    db: &Database,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
) -> Result<CleanupReport, AppError> {
    let cutoff = now - max_age;
    let videos = db.get_videos_for_cleanup(cutoff)?;
    let mut report = CleanupReport {
        candidates: videos.len(),
        ..Default::default()
    };

    if videos.is_empty() {
        log::debug!("No downloads to clean up");
        return Ok(report);
    }
    log::info!("Cleaning up {} downloaded videos", videos.len());

    for video in videos {
        let Some(path) = video.file_path.as_deref() else {
            continue;
        };

        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Download {} for video {} was already gone", path, video.id);
            }
            Err(e) => {
                log::error!("Failed to remove {} for video {}: {}", path, video.id, e);
                report.failed += 1;
                continue;
            }
        }

        match db.clear_download_fields(&video.id) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                log::error!("Failed to clear download record for {}: {:#}", video.id, e);
                report.failed += 1;
            }
        }
    }

    log::info!(
        "Cleanup completed: {} removed, {} failed",
        report.removed,
        report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DownloadStatus, NewVideo};
    use crate::test_support::setup_db_with_channels;
    use chrono::{Duration, TimeZone};
    use std::path::Path;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn add_downloaded(db: &Database, dir: &Path, id: &str, watched_hours_ago: Option<i64>) -> String {
        db.add_video(
            &NewVideo {
                id: id.to_string(),
                title: id.to_string(),
                published_at: now() - Duration::days(10),
                duration_seconds: 60,
                is_short: false,
            },
            "UCabc",
        )
        .unwrap();

        let path = dir.join(format!("{}.mp4", id));
        std::fs::write(&path, b"video").unwrap();
        let path = path.to_string_lossy().to_string();
        db.set_download_completed(id, &path, now() - Duration::days(5)).unwrap();
        if let Some(hours) = watched_hours_ago {
            db.set_watch_time(id, Some(now() - Duration::hours(hours))).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_removes_only_old_watched_downloads() {
        let (db, temp) = setup_db_with_channels(&["UCabc"]);
        let old = add_downloaded(&db, temp.path(), "old", Some(72));
        let recent = add_downloaded(&db, temp.path(), "recent", Some(2));
        let unwatched = add_downloaded(&db, temp.path(), "unwatched", None);

        let report = perform_cleanup(&db, now(), Duration::hours(48)).await.unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.removed, 1);
        assert!(!Path::new(&old).exists());
        assert!(Path::new(&recent).exists());
        assert!(Path::new(&unwatched).exists());

        let video = db.get_video("old").unwrap().unwrap();
        assert_eq!(video.download_status, DownloadStatus::None);
        assert_eq!(video.file_path, None);
        assert!(video.watch_time.is_some());
    }

    #[tokio::test]
    async fn test_missing_file_still_clears_record() {
        let (db, temp) = setup_db_with_channels(&["UCabc"]);
        let path = add_downloaded(&db, temp.path(), "gone", Some(100));
        std::fs::remove_file(&path).unwrap();

        let report = perform_cleanup(&db, now(), Duration::hours(48)).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(
            db.get_video("gone").unwrap().unwrap().download_status,
            DownloadStatus::None
        );
    }

    #[tokio::test]
    async fn test_unremovable_file_does_not_stop_sweep() {
        let (db, temp) = setup_db_with_channels(&["UCabc"]);
        let stuck = add_downloaded(&db, temp.path(), "stuck", Some(100));
        // a non-empty directory cannot be removed with remove_file
        std::fs::remove_file(&stuck).unwrap();
        std::fs::create_dir(&stuck).unwrap();
        std::fs::write(Path::new(&stuck).join("inner"), b"x").unwrap();
        let fine = add_downloaded(&db, temp.path(), "fine", Some(100));

        let report = perform_cleanup(&db, now(), Duration::hours(48)).await.unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 1);
        assert!(!Path::new(&fine).exists());
        assert_eq!(
            db.get_video("stuck").unwrap().unwrap().download_status,
            DownloadStatus::Completed
        );
    }
}
