pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod ingest;
pub mod metadata;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod test_support;

use config::Config;
use database::Database;
use feed::{FeedSource, YouTubeFeedSource};
use fetcher::FeedFetcher;
use metadata::{MetadataClient, YouTubeApiClient};
use scheduler::{Clock, Scheduler, SystemClock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use worker::download::DownloadManager;
use worker::executor::{DownloadExecutor, YtDlpExecutor};

/// Everything the operations in `commands` need, shared across tasks.
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub feeds: Arc<dyn FeedSource>,
    pub metadata: Arc<dyn MetadataClient>,
    pub clock: Arc<dyn Clock>,
    pub fetcher: FeedFetcher,
    pub downloads: DownloadManager,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Arc<Database>,
        feeds: Arc<dyn FeedSource>,
        metadata: Arc<dyn MetadataClient>,
        executor: Arc<dyn DownloadExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fetcher = FeedFetcher::new(
            db.clone(),
            feeds.clone(),
            metadata.clone(),
            config.fetch_concurrency,
        );
        let downloads = DownloadManager::new(
            db.clone(),
            executor,
            clock.clone(),
            config.downloads_dir.clone(),
        );
        Self {
            config,
            db,
            feeds,
            metadata,
            clock,
            fetcher,
            downloads,
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`). `log` macros are
/// forwarded to the subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // a subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run() -> anyhow::Result<()> {
    init_logging();

    let config_path = Config::default_path();
    let config = Config::load(&config_path)?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    log::info!("Opening database at {}", config.database_path.display());
    let db = Arc::new(Database::new(&config.database_path)?);

    let executor = Arc::new(YtDlpExecutor::default());
    if let Err(e) = executor.validate_installation().await {
        log::warn!("yt-dlp check failed, downloads will fail until it is installed: {}", e);
    }

    let metadata = Arc::new(YouTubeApiClient::new(&config.youtube_api_key));
    let state = Arc::new(AppState::new(
        config,
        db,
        Arc::new(YouTubeFeedSource::new()),
        metadata,
        executor,
        Arc::new(SystemClock),
    ));

    let shutdown = CancellationToken::new();
    let loops = [
        tokio::spawn(feed_fetch_scheduler(state.clone(), shutdown.clone())),
        tokio::spawn(download_cleanup_scheduler(state.clone(), shutdown.clone())),
    ];
    log::info!(
        "ytrssil started, downloads in {}",
        state.config.downloads_dir.display()
    );

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested");
    shutdown.cancel();

    for handle in loops {
        if let Err(e) = handle.await {
            log::error!("Background loop ended abnormally: {}", e);
        }
    }

    if !state.downloads.shutdown(state.config.shutdown_grace()).await {
        log::warn!("Unfinished downloads were cancelled");
    }
    log::info!("Shutdown complete");
    Ok(())
}

/// Poll every subscribed channel once per fetch interval.
async fn feed_fetch_scheduler(state: Arc<AppState>, shutdown: CancellationToken) {
    let scheduler = Scheduler::new(state.clock.clone(), shutdown);
    scheduler
        .run_every("Feed fetch", state.config.fetch_interval(), || {
            let state = state.clone();
            async move {
                if let Err(e) = commands::fetch_videos(&state).await {
                    log::error!("Failed to fetch videos: {}", e);
                }
            }
        })
        .await;
}

/// Delete old downloads once per cleanup interval.
async fn download_cleanup_scheduler(state: Arc<AppState>, shutdown: CancellationToken) {
    let scheduler = Scheduler::new(state.clock.clone(), shutdown);
    scheduler
        .run_every("Download cleanup", state.config.cleanup_interval(), || {
            let state = state.clone();
            async move {
                let now = state.clock.now();
                if let Err(e) =
                    worker::cleanup::perform_cleanup(&state.db, now, state.config.cleanup_age()).await
                {
                    log::error!("Failed to clean up downloads: {}", e);
                }
            }
        })
        .await;
}
