use crate::database::Channel;
use crate::error::AppError;
use crate::AppState;

/// POST /api/channels/{id}/subscribe -> subscribe_to_channel command
///
/// The channel name comes from its feed. A missing channel image is not an
/// error; the channel is stored without one.
pub async fn subscribe_to_channel(state: &AppState, channel_id: &str) -> Result<Channel, AppError> {
    let channel_id = channel_id.trim();
    if channel_id.is_empty() {
        return Err(AppError::Validation("channel id is empty".to_string()));
    }
    log::info!("subscribe_to_channel called for {}", channel_id);

    let parsed = state.feeds.fetch(channel_id).await?;

    let image_url = match state.metadata.channel_image_url(channel_id).await {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("Failed to get channel image for {}: {}", channel_id, e);
            None
        }
    };

    let channel = Channel {
        id: channel_id.to_string(),
        name: parsed.name,
        subscribed: true,
        image_url,
        unwatched_count: 0,
    };
    state.db.subscribe_to_channel(&channel)?;

    Ok(state.db.get_channel(channel_id)?.unwrap_or(channel))
}

/// POST /api/channels/{id}/unsubscribe -> unsubscribe_from_channel command
pub async fn unsubscribe_from_channel(state: &AppState, channel_id: &str) -> Result<(), AppError> {
    log::info!("unsubscribe_from_channel called for {}", channel_id);
    state.db.unsubscribe_from_channel(channel_id)?;
    Ok(())
}

/// GET /api/channels -> list_channels command
pub async fn list_channels(state: &AppState) -> Result<Vec<Channel>, AppError> {
    Ok(state.db.list_subscribed_channels()?)
}
