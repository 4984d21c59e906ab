// ABOUTME: ObservabilityBus - non-blocking fan-out of run events to any number
// ABOUTME: of subscribers, each with a bounded queue that drops oldest on overflow.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{BusEvent, BusItem};

/// Default per-subscriber queue bound.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Broadcasts run events. Cloning shares the same channel.
#[derive(Clone)]
pub struct ObservabilityBus {
    tx: broadcast::Sender<Arc<BusEvent>>,
}

impl ObservabilityBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; a bus with no subscribers drops it.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(Arc::new(event));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe from this point on. A subscriber that falls more than the
    /// capacity behind loses the oldest events and receives a `Gap` in their place.
    pub fn subscribe(&self) -> impl Stream<Item = BusItem> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield BusItem::Event(event),
                    Err(RecvError::Lagged(missed)) => yield BusItem::Gap { missed },
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Pass `items` through up to and including the event that settles `run_id`,
/// then end.
pub fn until_settled<S>(items: S, run_id: impl Into<String>) -> impl Stream<Item = BusItem> + Send + 'static
where
    S: Stream<Item = BusItem> + Send + 'static,
{
    let run_id = run_id.into();
    async_stream::stream! {
        let mut items = Box::pin(items);
        while let Some(item) = items.next().await {
            let settled = matches!(&item, BusItem::Event(event) if event.settles(&run_id));
            yield item;
            if settled {
                break;
            }
        }
    }
}

impl Default for ObservabilityBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl std::fmt::Debug for ObservabilityBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
