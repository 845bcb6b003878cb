use crate::error::AppError;
use crate::worker::download::ServedFile;
use crate::AppState;

/// POST /api/videos/{id}/download -> download_video command
///
/// Returns once the video is marked pending; poll the video to see the result.
pub async fn download_video(state: &AppState, video_id: &str) -> Result<(), AppError> {
    log::info!("download_video called for {}", video_id);
    state.downloads.download_video(video_id).await
}

/// GET /api/videos/{id}/file -> serve_video_file command
pub async fn serve_video_file(state: &AppState, video_id: &str) -> Result<ServedFile, AppError> {
    state.downloads.serve_video_file(video_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{fetch_videos, subscribe_to_channel};
    use crate::database::DownloadStatus;
    use crate::test_support::{entry, test_state, FakeFeedSource, FakeMetadata};

    #[tokio::test]
    async fn test_download_and_serve_through_state() {
        let feeds = FakeFeedSource::default().with_channel(
            "UCabc",
            "Abc",
            vec![entry("yt:video:xyz123", "Hello World", 1)],
        );
        let (state, _temp) = test_state(feeds, FakeMetadata::default().with_duration("xyz123", 300));
        subscribe_to_channel(&state, "UCabc").await.unwrap();
        fetch_videos(&state).await.unwrap();

        download_video(&state, "xyz123").await.unwrap();
        state.downloads.tasks().wait_idle().await;

        let video = state.db.get_video("xyz123").unwrap().unwrap();
        assert_eq!(video.download_status, DownloadStatus::Completed);

        let served = serve_video_file(&state, "xyz123").await.unwrap();
        assert_eq!(served.filename, "Hello_World.mp4");
        assert!(served.path.starts_with(&state.config.downloads_dir));
    }

    #[tokio::test]
    async fn test_download_unknown_video() {
        let (state, _temp) = test_state(FakeFeedSource::default(), FakeMetadata::default());
        let err = download_video(&state, "nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
