use crate::database::{NewVideo, Video, VideoPage};
use crate::error::AppError;
use crate::fetcher::FetchSummary;
use crate::AppState;

/// Upper bound for a stored playback position (about 68 years).
const MAX_PROGRESS_SECONDS: i64 = i32::MAX as i64;

/// POST /api/videos/fetch -> fetch_videos command
pub async fn fetch_videos(state: &AppState) -> Result<FetchSummary, AppError> {
    state.fetcher.fetch_all().await
}

/// GET /api/videos/new -> get_new_videos command
pub async fn get_new_videos(state: &AppState, sort_desc: bool) -> Result<Vec<Video>, AppError> {
    Ok(state.db.get_new_videos(sort_desc)?)
}

/// GET /api/videos/watched?page=N -> get_watched_videos command
///
/// Pages start at 1. `next_page` is set only when another page has results.
pub async fn get_watched_videos(
    state: &AppState,
    sort_desc: bool,
    page: u32,
) -> Result<VideoPage, AppError> {
    if page == 0 {
        return Err(AppError::Validation("page numbers start at 1".to_string()));
    }

    let page_size = i64::from(state.config.watched_page_size);
    let offset = i64::from(page - 1) * page_size;
    // one extra row tells us whether there is a next page
    let mut videos = state.db.get_watched_videos(sort_desc, page_size + 1, offset)?;

    let next_page = if videos.len() as i64 > page_size {
        videos.truncate(page_size as usize);
        Some(page + 1)
    } else {
        None
    };

    Ok(VideoPage { videos, next_page })
}

/// POST /api/videos/{id}/watch -> mark_video_as_watched command
pub async fn mark_video_as_watched(state: &AppState, video_id: &str) -> Result<(), AppError> {
    state.db.set_watch_time(video_id, Some(state.clock.now()))?;
    Ok(())
}

/// POST /api/videos/{id}/unwatch -> mark_video_as_unwatched command
pub async fn mark_video_as_unwatched(state: &AppState, video_id: &str) -> Result<(), AppError> {
    state.db.set_watch_time(video_id, None)?;
    Ok(())
}

/// POST /api/videos/{id}/progress -> set_video_progress command
pub async fn set_video_progress(
    state: &AppState,
    video_id: &str,
    progress: &str,
) -> Result<Video, AppError> {
    let seconds = parse_progress(progress)?;
    Ok(state.db.set_progress(video_id, seconds)?)
}

/// POST /api/videos/{id}/add -> add_custom_video command
///
/// Adds a single video from any channel. The channel is created unsubscribed
/// if it is not known yet, so its other uploads do not start showing up.
pub async fn add_custom_video(state: &AppState, video_id: &str) -> Result<Video, AppError> {
    let video_id = video_id.trim();
    if video_id.is_empty() {
        return Err(AppError::Validation("video id is empty".to_string()));
    }
    if state.db.has_video(video_id)? {
        return Err(AppError::Conflict(format!("video {} already exists", video_id)));
    }

    let metadata = state.metadata.video_metadata(video_id).await?;

    if state
        .db
        .ensure_channel(&metadata.channel_id, &metadata.channel_name)?
    {
        log::info!(
            "Added channel {} ({}) without subscribing",
            metadata.channel_name,
            metadata.channel_id
        );
    }

    let video = NewVideo {
        id: metadata.id.clone(),
        title: metadata.title,
        published_at: metadata.published_at,
        duration_seconds: metadata.duration_seconds,
        is_short: metadata.is_short,
    };
    if !state.db.add_video(&video, &metadata.channel_id)? {
        return Err(AppError::Conflict(format!("video {} already exists", video_id)));
    }

    state
        .db
        .get_video(&video.id)?
        .ok_or_else(|| AppError::Integrity(format!("video {} missing after insert", video.id)))
}

/// Parse a playback position into whole seconds.
///
/// Accepts plain seconds (`"150"`) or unit durations such as `"1h2m3s"`,
/// `"2m30s"`, `"1.5m"` or `"1500ms"`. Fractions are floored.
pub fn parse_progress(input: &str) -> Result<i64, AppError> {
    let value = input.trim();
    let invalid = || AppError::Validation(format!("invalid progress time {:?}", input));

    if value.is_empty() || value.starts_with('-') {
        return Err(invalid());
    }
    if let Ok(seconds) = value.parse::<i64>() {
        if seconds > MAX_PROGRESS_SECONDS {
            return Err(invalid());
        }
        return Ok(seconds);
    }

    let mut total = 0f64;
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            _ => return Err(invalid()),
        };
        total += number * scale;
        rest = &rest[unit_len..];
    }

    if !total.is_finite() || total > MAX_PROGRESS_SECONDS as f64 {
        return Err(invalid());
    }
    Ok(total.floor() as i64)
}
