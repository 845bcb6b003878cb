//! Deduplication and persistence of feed entries for one channel.

use crate::database::{Database, NewVideo};
use crate::error::AppError;
use crate::feed::ParsedChannel;
use crate::metadata::{enrich_durations, MetadataClient};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const SHORTS_LINK_PATTERN: &str = r"^https?://(?:www\.|m\.)?youtube\.com/shorts/";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Unseen videos staged for enrichment.
    pub staged: usize,
    pub inserted: usize,
    /// Staged videos that another run inserted first.
    pub already_present: usize,
    /// Entries dropped before staging (unparseable id or timestamp, lookup error).
    pub skipped: usize,
}

/// Video id from a compound feed entry id such as `yt:video:<id>`.
pub fn video_id_from_entry_id(entry_id: &str) -> Option<&str> {
    entry_id
        .rsplit_once(':')
        .map(|(_, id)| id.trim())
        .filter(|id| !id.is_empty())
}

pub fn is_short_link(link: &str) -> bool {
    static SHORTS_RE: OnceLock<Option<Regex>> = OnceLock::new();
    SHORTS_RE
        .get_or_init(|| Regex::new(SHORTS_LINK_PATTERN).ok())
        .as_ref()
        .map(|re| re.is_match(link))
        .unwrap_or(false)
}

/// Stage every unseen entry, enrich the batch, then insert it.
///
/// Enrichment failure aborts the whole channel for this cycle; nothing is
/// inserted, so the same entries are picked up again on the next fetch.
pub async fn ingest_channel(
    db: &Database,
    metadata: &dyn MetadataClient,
    parsed: ParsedChannel,
) -> Result<IngestReport, AppError> {
    let mut report = IngestReport::default();
    let mut staged: HashMap<String, NewVideo> = HashMap::with_capacity(parsed.entries.len());

    for entry in parsed.entries {
        let Some(published_at) = entry.published else {
            log::error!(
                "Failed to parse publish time for entry {} in channel {}",
                entry.id,
                parsed.channel_id
            );
            report.skipped += 1;
            continue;
        };

        let Some(video_id) = video_id_from_entry_id(&entry.id) else {
            log::error!(
                "Unrecognized entry id {:?} in channel {}",
                entry.id,
                parsed.channel_id
            );
            report.skipped += 1;
            continue;
        };

        if staged.contains_key(video_id) {
            continue;
        }

        match db.has_video(video_id) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                log::error!("Failed to check whether video {} exists: {:#}", video_id, e);
                report.skipped += 1;
                continue;
            }
        }

        let is_short = entry.link.as_deref().map(is_short_link).unwrap_or(false);
        staged.insert(
            video_id.to_string(),
            NewVideo {
                id: video_id.to_string(),
                title: entry.title,
                published_at,
                duration_seconds: 0,
                is_short,
            },
        );
    }

    report.staged = staged.len();
    if staged.is_empty() {
        return Ok(report);
    }

    enrich_durations(metadata, &mut staged).await?;

    for video in staged.values() {
        match db.add_video(video, &parsed.channel_id) {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.already_present += 1,
            Err(e) => log::error!("Failed to save video {} to db: {:#}", video.id, e),
        }
    }

    if report.inserted > 0 {
        log::info!(
            "Channel {}: {} new videos",
            parsed.channel_id,
            report.inserted
        );
    }

    Ok(report)
}
