pub mod models;


use crate::error::AppError;
use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use models::*;

/// Columns selected for every `Video` read; `row_to_video` depends on the order.
const VIDEO_COLUMNS: &str = "v.id, v.channel_id, c.name, v.title, v.published_timestamp,
    v.watch_timestamp, v.duration_seconds, v.progress_seconds, v.is_short,
    v.downloaded_at, v.file_path, v.download_status, v.download_error";

/// SQLite-backed store for channels and videos.
///
/// All access goes through one connection behind a mutex, so every statement
/// (and every multi-statement method) is atomic with respect to the others.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=5000;
        ",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subscribed INTEGER NOT NULL DEFAULT 1,
                image_url TEXT
            );

            CREATE TABLE IF NOT EXISTS videos (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                title TEXT NOT NULL,
                published_timestamp TEXT NOT NULL,
                watch_timestamp TEXT,
                duration_seconds INTEGER NOT NULL DEFAULT 0,
                progress_seconds INTEGER NOT NULL DEFAULT 0,
                is_short INTEGER NOT NULL DEFAULT 0,
                downloaded_at TEXT,
                file_path TEXT,
                download_status TEXT NOT NULL DEFAULT 'none',
                download_error TEXT,
                FOREIGN KEY (channel_id) REFERENCES channels(id)
            );

            CREATE INDEX IF NOT EXISTS idx_videos_channel ON videos(channel_id);
            CREATE INDEX IF NOT EXISTS idx_videos_watch ON videos(watch_timestamp);
            CREATE INDEX IF NOT EXISTS idx_videos_download_status ON videos(download_status);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Insert the channel as subscribed, or re-subscribe it if it already exists.
    pub fn subscribe_to_channel(&self, channel: &Channel) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO channels (id, name, subscribed, image_url) VALUES (?, ?, 1, ?)
             ON CONFLICT(id) DO UPDATE SET
                subscribed = 1,
                name = excluded.name,
                image_url = COALESCE(excluded.image_url, channels.image_url)",
            params![channel.id, channel.name, channel.image_url],
        )?;
        Ok(())
    }

    /// Record a channel without subscribing to it. Existing rows are untouched.
    pub fn ensure_channel(&self, channel_id: &str, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO channels (id, name, subscribed) VALUES (?, ?, 0)",
            params![channel_id, name],
        )?;
        Ok(inserted == 1)
    }

    pub fn unsubscribe_from_channel(&self, channel_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE channels SET subscribed = 0 WHERE id = ?",
            params![channel_id],
        )?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("channel {}", channel_id)).into());
        }
        Ok(())
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        let conn = self.conn()?;
        let channel = conn
            .query_row(
                "SELECT c.id, c.name, c.subscribed, c.image_url,
                        (SELECT COUNT(*) FROM videos v
                          WHERE v.channel_id = c.id AND v.watch_timestamp IS NULL)
                 FROM channels c WHERE c.id = ?",
                params![channel_id],
                row_to_channel,
            )
            .optional()?;
        Ok(channel)
    }

    /// Subscribed channels ordered by name, with their unwatched-video counts.
    pub fn list_subscribed_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.subscribed, c.image_url,
                    (SELECT COUNT(*) FROM videos v
                      WHERE v.channel_id = c.id AND v.watch_timestamp IS NULL)
             FROM channels c
             WHERE c.subscribed = 1
             ORDER BY c.name COLLATE NOCASE",
        )?;
        let channels = stmt
            .query_map([], row_to_channel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(channels)
    }

    // =========================================================================
    // Videos
    // =========================================================================

    pub fn has_video(&self, video_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?)",
            params![video_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Insert a video, ignoring a conflicting id.
    ///
    /// Returns `false` when a row with the same id already exists.
    pub fn add_video(&self, video: &NewVideo, channel_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO videos
                (id, channel_id, title, published_timestamp, duration_seconds, is_short, download_status)
             VALUES (?, ?, ?, ?, ?, ?, 'none')",
            params![
                video.id,
                channel_id,
                video.title,
                to_db_time(&video.published_at),
                video.duration_seconds,
                video.is_short,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        let conn = self.conn()?;
        let video = conn
            .query_row(
                &format!(
                    "SELECT {} FROM videos v LEFT JOIN channels c ON v.channel_id = c.id
                     WHERE v.id = ?",
                    VIDEO_COLUMNS
                ),
                params![video_id],
                row_to_video,
            )
            .optional()?;
        Ok(video)
    }

    /// Unwatched videos from subscribed channels, ordered by publish time.
    pub fn get_new_videos(&self, sort_desc: bool) -> Result<Vec<Video>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM videos v JOIN channels c ON v.channel_id = c.id
             WHERE v.watch_timestamp IS NULL AND c.subscribed = 1
             ORDER BY v.published_timestamp {}",
            VIDEO_COLUMNS,
            if sort_desc { "DESC" } else { "ASC" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let videos = stmt
            .query_map([], row_to_video)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    /// Watched videos ordered by watch time, one page at a time.
    pub fn get_watched_videos(&self, sort_desc: bool, limit: i64, offset: i64) -> Result<Vec<Video>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM videos v LEFT JOIN channels c ON v.channel_id = c.id
             WHERE v.watch_timestamp IS NOT NULL
             ORDER BY v.watch_timestamp {}
             LIMIT ? OFFSET ?",
            VIDEO_COLUMNS,
            if sort_desc { "DESC" } else { "ASC" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let videos = stmt
            .query_map(params![limit, offset], row_to_video)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    /// Set or clear the watch timestamp.
    pub fn set_watch_time(&self, video_id: &str, watch_time: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE videos SET watch_timestamp = ? WHERE id = ?",
            params![watch_time.as_ref().map(to_db_time), video_id],
        )?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("video {}", video_id)).into());
        }
        Ok(())
    }

    pub fn set_progress(&self, video_id: &str, progress_seconds: i64) -> Result<Video> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE videos SET progress_seconds = ? WHERE id = ?",
            params![progress_seconds, video_id],
        )?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("video {}", video_id)).into());
        }
        let video = conn.query_row(
            &format!(
                "SELECT {} FROM videos v LEFT JOIN channels c ON v.channel_id = c.id
                 WHERE v.id = ?",
                VIDEO_COLUMNS
            ),
            params![video_id],
            row_to_video,
        )?;
        Ok(video)
    }

    // =========================================================================
    // Download lifecycle
    // =========================================================================

    pub fn set_download_status(&self, video_id: &str, status: DownloadStatus) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE videos SET download_status = ? WHERE id = ?",
            params![status.as_str(), video_id],
        )?;
        expect_one_row(affected, "set download status", video_id)
    }

    /// Mark the download as completed and drop any previous error.
    pub fn set_download_completed(
        &self,
        video_id: &str,
        file_path: &str,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE videos SET
                download_status = 'completed',
                file_path = ?,
                downloaded_at = ?,
                download_error = NULL
             WHERE id = ?",
            params![file_path, to_db_time(&downloaded_at), video_id],
        )?;
        expect_one_row(affected, "mark download completed", video_id)
    }

    pub fn set_download_failed(&self, video_id: &str, error: &str) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE videos SET
                download_status = 'failed',
                download_error = ?,
                file_path = NULL,
                downloaded_at = NULL
             WHERE id = ?",
            params![error, video_id],
        )?;
        expect_one_row(affected, "mark download failed", video_id)
    }

    /// Reset a video's download sub-record to `none`.
    pub fn clear_download_fields(&self, video_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE videos SET
                download_status = 'none',
                file_path = NULL,
                downloaded_at = NULL,
                download_error = NULL
             WHERE id = ?",
            params![video_id],
        )?;
        expect_one_row(affected, "clear download fields", video_id)
    }

    /// Completed downloads whose video was watched before `watched_before`.
    pub fn get_videos_for_cleanup(&self, watched_before: DateTime<Utc>) -> Result<Vec<Video>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos v LEFT JOIN channels c ON v.channel_id = c.id
             WHERE v.download_status = 'completed'
               AND v.file_path IS NOT NULL
               AND v.downloaded_at IS NOT NULL
               AND v.watch_timestamp IS NOT NULL
               AND v.watch_timestamp < ?",
            VIDEO_COLUMNS
        ))?;
        let videos = stmt
            .query_map(params![to_db_time(&watched_before)], row_to_video)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }
}

fn expect_one_row(affected: usize, action: &str, video_id: &str) -> Result<()> {
    if affected != 1 {
        return Err(AppError::Integrity(format!(
            "{}: expected 1 row for video {}, updated {}",
            action, video_id, affected
        ))
        .into());
    }
    Ok(())
}

/// Fixed-width RFC 3339 in UTC, so stored timestamps sort lexicographically.
fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_db_time(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_db_time(idx, v)).transpose()
}

fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        subscribed: row.get::<_, i32>(2)? == 1,
        image_url: row.get(3)?,
        unwatched_count: row.get(4)?,
    })
}

fn row_to_video(row: &Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        channel_name: row.get(2)?,
        title: row.get(3)?,
        published_at: parse_db_time(4, row.get(4)?)?,
        watch_time: parse_opt_db_time(5, row.get(5)?)?,
        duration_seconds: row.get(6)?,
        progress_seconds: row.get(7)?,
        is_short: row.get::<_, i32>(8)? == 1,
        downloaded_at: parse_opt_db_time(9, row.get(9)?)?,
        file_path: row.get(10)?,
        download_status: DownloadStatus::from(row.get::<_, String>(11)?),
        download_error: row.get(12)?,
    })
}
