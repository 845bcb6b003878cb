//! Channel feed source.
//!
//! Fetches a channel's public Atom feed and flattens it into the channel name
//! plus raw entries. No deduplication or enrichment happens here.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

const FEED_BASE_URL: &str = "https://www.youtube.com/feeds/videos.xml";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid channel ID: {0}")]
    InvalidChannel(String),

    #[error("failed to fetch feed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to get feed with status {0}")]
    Status(u16),

    #[error("failed to parse feed: {0}")]
    ParseFailure(String),
}

impl From<FeedError> for AppError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::InvalidChannel(id) => AppError::NotFound(format!("channel {}", id)),
            other => AppError::Transient(other.to_string()),
        }
    }
}

/// One raw entry from a channel feed, before dedup and enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Compound entry id, e.g. `yt:video:<video id>`.
    pub id: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChannel {
    pub channel_id: String,
    pub name: String,
    pub entries: Vec<FeedEntry>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, channel_id: &str) -> Result<ParsedChannel, FeedError>;
}

/// Reads the public per-channel Atom feed over HTTP.
pub struct YouTubeFeedSource {
    client: reqwest::Client,
    base_url: String,
}

impl YouTubeFeedSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: FEED_BASE_URL.to_string(),
        }
    }
}

impl Default for YouTubeFeedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for YouTubeFeedSource {
    async fn fetch(&self, channel_id: &str) -> Result<ParsedChannel, FeedError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("channel_id", channel_id)])
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => {
                return Err(FeedError::InvalidChannel(channel_id.to_string()))
            }
            status if !status.is_success() => return Err(FeedError::Status(status.as_u16())),
            _ => {}
        }

        let body = response.bytes().await?;
        parse_feed(channel_id, &body)
    }
}

/// Parse a channel's Atom document.
pub fn parse_feed(channel_id: &str, body: &[u8]) -> Result<ParsedChannel, FeedError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| FeedError::ParseFailure(e.to_string()))?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| FeedEntry {
            id: entry.id,
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            published: entry.published,
            link: entry.links.into_iter().next().map(|l| l.href),
        })
        .collect();

    Ok(ParsedChannel {
        channel_id: channel_id.to_string(),
        name: feed.title.map(|t| t.content).unwrap_or_default(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <link rel="self" href="http://www.youtube.com/feeds/videos.xml?channel_id=UCabc"/>
 <id>yt:channel:UCabc</id>
 <yt:channelId>UCabc</yt:channelId>
 <title>Abc Channel</title>
 <author>
  <name>Abc Channel</name>
  <uri>https://www.youtube.com/channel/UCabc</uri>
 </author>
 <published>2015-03-01T10:00:00+00:00</published>
 <entry>
  <id>yt:video:xyz123</id>
  <yt:videoId>xyz123</yt:videoId>
  <yt:channelId>UCabc</yt:channelId>
  <title>Hello World</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=xyz123"/>
  <published>2024-01-01T00:00:00+00:00</published>
  <updated>2024-01-02T00:00:00+00:00</updated>
 </entry>
 <entry>
  <id>yt:video:short01</id>
  <yt:videoId>short01</yt:videoId>
  <yt:channelId>UCabc</yt:channelId>
  <title>Quick one</title>
  <link rel="alternate" href="https://www.youtube.com/shorts/short01"/>
  <published>2024-01-03T12:30:00+00:00</published>
  <updated>2024-01-03T12:30:00+00:00</updated>
 </entry>
</feed>"#;

    #[test]
    fn test_parse_feed_extracts_name_and_entries() {
        let parsed = parse_feed("UCabc", SAMPLE_FEED.as_bytes()).unwrap();
        assert_eq!(parsed.channel_id, "UCabc");
        assert_eq!(parsed.name, "Abc Channel");
        assert_eq!(parsed.entries.len(), 2);

        let first = &parsed.entries[0];
        assert_eq!(first.id, "yt:video:xyz123");
        assert_eq!(first.title, "Hello World");
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            first.link.as_deref(),
            Some("https://www.youtube.com/watch?v=xyz123")
        );
        assert_eq!(
            parsed.entries[1].link.as_deref(),
            Some("https://www.youtube.com/shorts/short01")
        );
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        let err = parse_feed("UCabc", b"<html>not a feed").unwrap_err();
        assert!(matches!(err, FeedError::ParseFailure(_)));
    }

    #[test]
    fn test_invalid_channel_maps_to_not_found() {
        let err = AppError::from(FeedError::InvalidChannel("UCnope".into()));
        assert!(matches!(err, AppError::NotFound(_)));
        let err = AppError::from(FeedError::Status(500));
        assert!(matches!(err, AppError::Transient(_)));
    }
}
