//! Fan-out over subscribed channels.
//!
//! Every channel is fetched and ingested independently with at most
//! `concurrency` channels in flight. One channel failing never affects the
//! others; the failure is logged and the channel is retried next cycle.

use crate::database::Database;
use crate::error::AppError;
use crate::feed::{FeedError, FeedSource};
use crate::ingest::{ingest_channel, IngestReport};
use crate::metadata::MetadataClient;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub channels: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_videos: usize,
}

pub struct FeedFetcher {
    db: Arc<Database>,
    feeds: Arc<dyn FeedSource>,
    metadata: Arc<dyn MetadataClient>,
    concurrency: usize,
}

impl FeedFetcher {
    pub fn new(
        db: Arc<Database>,
        feeds: Arc<dyn FeedSource>,
        metadata: Arc<dyn MetadataClient>,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            feeds,
            metadata,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch and ingest every subscribed channel.
    ///
    /// Only a failure to list the subscriptions is returned as an error.
    pub async fn fetch_all(&self) -> Result<FetchSummary, AppError> {
        log::info!("Fetching new videos for all channels");
        let channels = self.db.list_subscribed_channels()?;

        let mut summary = FetchSummary {
            channels: channels.len(),
            ..Default::default()
        };

        let mut outcomes = stream::iter(channels)
            .map(|channel| async move {
                let outcome = self.process_channel(&channel.id).await;
                (channel.id, outcome)
            })
            .buffer_unordered(self.concurrency);

        while let Some((channel_id, outcome)) = outcomes.next().await {
            match outcome {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.new_videos += report.inserted;
                }
                Err(e) => {
                    summary.failed += 1;
                    log::error!("Failed to fetch videos for channel {}: {}", channel_id, e);
                }
            }
        }

        log::info!(
            "Fetched {} channels ({} failed), {} new videos",
            summary.channels,
            summary.failed,
            summary.new_videos
        );
        Ok(summary)
    }

    async fn process_channel(&self, channel_id: &str) -> Result<IngestReport, AppError> {
        let parsed = match self.feeds.fetch(channel_id).await {
            Ok(parsed) => parsed,
            Err(FeedError::InvalidChannel(id)) => {
                log::warn!("Channel {} no longer has a feed", id);
                return Err(FeedError::InvalidChannel(id).into());
            }
            Err(e) => return Err(e.into()),
        };

        ingest_channel(&self.db, self.metadata.as_ref(), parsed).await
    }
}
