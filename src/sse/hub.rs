use crate::sse::models::{AnalyticsEvent, CONNECTED_FRAME, PING_FRAME};
use axum::body::Bytes;
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
#[error("subscriber channel is closed")]
pub struct SinkClosed;

/// Output side of one streaming client connection.
///
/// Writes must not block: implementations append to a buffer owned by the
/// transport and report failure only when the connection is already gone.
pub trait SubscriberSink: Send + Sync {
    fn write(&self, frame: Bytes) -> Result<(), SinkClosed>;
}

impl SubscriberSink for mpsc::UnboundedSender<Bytes> {
    fn write(&self, frame: Bytes) -> Result<(), SinkClosed> {
        self.send(frame).map_err(|_| SinkClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct HubInner {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn SubscriberSink>>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<dyn SubscriberSink>>> {
        // A panicking writer cannot leave the map half-updated, so keep serving.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, frame: &Bytes) {
        let subscribers = self.subscribers();
        for (id, sink) in subscribers.iter() {
            if let Err(e) = sink.write(frame.clone()) {
                debug!(subscriber = ?id, "Dropping frame for subscriber: {}", e);
            }
        }
    }
}

/// In-process fan-out of analytics events to every open event stream.
///
/// Cloning is cheap and every clone refers to the same subscriber set.
#[derive(Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        RealtimeHub {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a hub and starts its keepalive task on the current runtime.
    ///
    /// The task only holds a weak reference, so it ends once the last clone
    /// of the hub is dropped, and it never holds up runtime shutdown.
    pub fn with_heartbeat(period: Duration) -> Self {
        let hub = RealtimeHub::new();
        hub.spawn_heartbeat(period);
        hub
    }

    fn spawn_heartbeat(&self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(run_heartbeat(Arc::downgrade(&self.inner), period))
    }

    /// Adds `sink` to the live set and immediately writes the connected comment.
    pub fn register(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.inner.subscribers();
        if let Err(e) = sink.write(Bytes::from_static(CONNECTED_FRAME)) {
            debug!(subscriber = ?id, "Connected comment not delivered: {}", e);
        }
        subscribers.insert(id, sink);
        info!(subscriber = ?id, total = subscribers.len(), "Analytics subscriber registered");
        id
    }

    /// Returns whether the subscriber was still registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.inner.subscribers();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!(subscriber = ?id, total = subscribers.len(), "Analytics subscriber removed");
        }
        removed
    }

    /// Registers an in-memory channel and hands back its readable end.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(Arc::new(tx));
        Subscription {
            id,
            hub: self.clone(),
            frames: UnboundedReceiverStream::new(rx),
        }
    }

    /// Serializes `event` once and writes the frame to every live subscriber.
    pub fn broadcast(&self, event: &AnalyticsEvent) {
        match event.to_frame() {
            Ok(frame) => self.inner.fan_out(&frame),
            Err(e) => error!("Failed to serialize analytics event: {}", e),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_heartbeat(hub: Weak<HubInner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ping = Bytes::from_static(PING_FRAME);

    loop {
        ticker.tick().await;
        let Some(inner) = hub.upgrade() else {
            debug!("Realtime hub dropped, stopping heartbeat");
            break;
        };
        inner.fan_out(&ping);
    }
}

/// A registered channel subscriber. Yields every frame written to it and
/// unregisters from the hub when dropped.
pub struct Subscription {
    id: SubscriberId,
    hub: RealtimeHub,
    frames: UnboundedReceiverStream<Bytes>,
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
