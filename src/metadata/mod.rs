//! Video metadata lookups against the YouTube Data API.
//!
//! Feeds only carry title and publish time, so newly discovered videos are
//! enriched here with their durations in one batched request.

use crate::database::NewVideo;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const SHORTS_BASE_URL: &str = "https://www.youtube.com/shorts";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("request to YouTube API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("got non-200 status from YouTube API [{status}]: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse video duration [{0}]")]
    InvalidDuration(String),

    #[error("failed to parse published time [{0}]")]
    InvalidTimestamp(String),

    #[error("not found in catalog: {0}")]
    NotFound(String),
}

impl From<MetadataError> for AppError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Transient(other.to_string()),
        }
    }
}

/// Complete metadata for a single video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub is_short: bool,
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Durations in seconds, keyed by video id. Ids unknown to the catalog are absent.
    async fn batch_durations(&self, ids: &[String]) -> Result<HashMap<String, i64>, MetadataError>;

    async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata, MetadataError>;

    async fn channel_image_url(&self, channel_id: &str) -> Result<String, MetadataError>;
}

/// Fill in `duration_seconds` for every staged video with a single request.
///
/// Does nothing (and sends nothing) when there are no staged videos.
pub async fn enrich_durations(
    client: &dyn MetadataClient,
    videos: &mut HashMap<String, NewVideo>,
) -> Result<(), MetadataError> {
    if videos.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = videos.keys().cloned().collect();
    let durations = client.batch_durations(&ids).await?;

    for (id, video) in videos.iter_mut() {
        match durations.get(id) {
            Some(seconds) => video.duration_seconds = *seconds,
            None => log::warn!("No duration returned for video {}", id),
        }
    }

    Ok(())
}

/// Parse an ISO 8601 duration such as `PT1H2M3S` or `P1DT30M` into whole seconds.
pub fn parse_iso8601_duration(value: &str) -> Result<i64, MetadataError> {
    let invalid = || MetadataError::InvalidDuration(value.to_string());
    let rest = value.strip_prefix('P').ok_or_else(invalid)?;

    let mut seconds = 0f64;
    let mut in_time = false;
    let mut saw_component = false;
    let mut number = String::new();

    for c in rest.chars() {
        match c {
            'T' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' => number.push(c),
            unit => {
                let n: f64 = number.parse().map_err(|_| invalid())?;
                number.clear();
                let scale = match (in_time, unit) {
                    (false, 'W') => 604_800.0,
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return Err(invalid()),
                };
                seconds += n * scale;
                saw_component = true;
            }
        }
    }

    if !number.is_empty() || !saw_component {
        return Err(invalid());
    }
    Ok(seconds.round() as i64)
}

// ============================================================================
// YouTube Data API client
// ============================================================================

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<ApiVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVideo {
    id: String,
    #[serde(default)]
    snippet: Option<ApiSnippet>,
    content_details: ApiContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSnippet {
    published_at: String,
    channel_id: String,
    title: String,
    channel_title: String,
}

#[derive(Debug, Deserialize)]
struct ApiContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ApiChannel>,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    snippet: ApiChannelSnippet,
}

#[derive(Debug, Deserialize)]
struct ApiChannelSnippet {
    thumbnails: ApiThumbnails,
}

#[derive(Debug, Deserialize)]
struct ApiThumbnails {
    medium: ApiThumbnail,
}

#[derive(Debug, Deserialize)]
struct ApiThumbnail {
    url: String,
}

pub struct YouTubeApiClient {
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
    api_key: String,
    base_url: String,
    shorts_base_url: String,
}

impl YouTubeApiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            no_redirect_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
            api_key: api_key.to_string(),
            base_url: API_BASE_URL.to_string(),
            shorts_base_url: SHORTS_BASE_URL.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MetadataError> {
        let url = format!("{}/{}", self.base_url, resource);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to decode body".to_string());
            return Err(MetadataError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    /// A short answers 200 on its `/shorts/` URL; regular videos redirect.
    async fn is_short(&self, video_id: &str) -> Result<bool, MetadataError> {
        let url = format!("{}/{}", self.shorts_base_url, video_id);
        let response = self.no_redirect_client.head(&url).send().await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }
}

#[async_trait]
impl MetadataClient for YouTubeApiClient {
    async fn batch_durations(&self, ids: &[String]) -> Result<HashMap<String, i64>, MetadataError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = ids.join(",");
        log::info!("Requesting durations for {} videos", ids.len());
        let response: VideoListResponse = self
            .get_json("videos", &[("id", joined.as_str()), ("part", "contentDetails")])
            .await?;

        response
            .items
            .into_iter()
            .map(|v| -> Result<(String, i64), MetadataError> {
                let seconds = parse_iso8601_duration(&v.content_details.duration)?;
                Ok((v.id, seconds))
            })
            .collect()
    }

    async fn video_metadata(&self, video_id: &str) -> Result<VideoMetadata, MetadataError> {
        log::info!("Requesting metadata for video {}", video_id);
        let response: VideoListResponse = self
            .get_json(
                "videos",
                &[("id", video_id), ("part", "snippet,contentDetails")],
            )
            .await?;

        let video = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::NotFound(format!("video {}", video_id)))?;
        let snippet = video
            .snippet
            .ok_or_else(|| MetadataError::NotFound(format!("video {}", video_id)))?;

        let published_at = DateTime::parse_from_rfc3339(&snippet.published_at)
            .map_err(|_| MetadataError::InvalidTimestamp(snippet.published_at.clone()))?
            .with_timezone(&Utc);
        let duration_seconds = parse_iso8601_duration(&video.content_details.duration)?;
        let is_short = self.is_short(video_id).await?;

        Ok(VideoMetadata {
            id: video.id,
            title: snippet.title,
            channel_id: snippet.channel_id,
            channel_name: snippet.channel_title,
            published_at,
            duration_seconds,
            is_short,
        })
    }

    async fn channel_image_url(&self, channel_id: &str) -> Result<String, MetadataError> {
        let response: ChannelListResponse = self
            .get_json(
                "channels",
                &[
                    ("id", channel_id),
                    ("part", "snippet"),
                    ("fields", "items/snippet/thumbnails"),
                ],
            )
            .await?;

        response
            .items
            .into_iter()
            .next()
            .map(|c| c.snippet.thumbnails.medium.url)
            .ok_or_else(|| MetadataError::NotFound(format!("channel {}", channel_id)))
    }
}
