use crate::db::PgAnalyticsStore;
use crate::error::PollError;
use crate::sse::hub::{RealtimeHub, Subscription};
use crate::sse::models::AnalyticsEvent;
use crate::sse::snapshot::{AnalyticsStore, compute_snapshot};
use crate::startup::AppState;
use axum::{
    body::{Body, Bytes},
    extract::Extension,
    http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use futures::stream::{BoxStream, StreamExt};
use std::convert::Infallible;
use tracing::{debug, error};

/// Registers a new subscriber and returns its frames: the connected comment,
/// one snapshot event, then whatever the hub broadcasts.
pub async fn open_analytics_stream<S: AnalyticsStore>(
    hub: &RealtimeHub,
    store: &S,
) -> Result<BoxStream<'static, Bytes>, PollError> {
    let subscription = hub.subscribe();

    let snapshot = compute_snapshot(store).await.map_err(|e| {
        error!("Failed to compute analytics snapshot: {}", e);
        PollError::from(e)
    })?;
    let snapshot_frame = AnalyticsEvent::Snapshot { payload: snapshot }
        .to_frame()
        .map_err(|e| PollError::DatabaseError(e.to_string()))?;

    Ok(frames_after_snapshot(subscription, snapshot_frame))
}

fn frames_after_snapshot(
    mut subscription: Subscription,
    snapshot_frame: Bytes,
) -> BoxStream<'static, Bytes> {
    async_stream::stream! {
        // The connected comment is always the first frame in the channel.
        if let Some(connected) = subscription.next().await {
            yield connected;
        }
        yield snapshot_frame;
        while let Some(frame) = subscription.next().await {
            yield frame;
        }
    }
    .boxed()
}

pub async fn analytics_stream(
    Extension(app_state): Extension<AppState>,
) -> Result<Response, PollError> {
    let store = PgAnalyticsStore::new(app_state.db.clone());
    let frames = open_analytics_stream(&app_state.hub, &store).await?;
    debug!(subscribers = app_state.hub.subscriber_count(), "Analytics stream opened");

    Ok((
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames.map(Ok::<_, Infallible>)),
    )
        .into_response())
}
