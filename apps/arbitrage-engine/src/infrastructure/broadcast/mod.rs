//! Broadcast Topics
//!
//! Fan-out of domain events to any number of independent subscribers, built
//! on tokio broadcast channels.
//!
//! Each topic has a fixed capacity. A subscriber that falls behind loses the
//! oldest events and is told how many it missed; the loss is logged and
//! counted, and the subscriber carries on from the oldest retained event.
//! Publishing never waits on subscribers, and dropped subscribers are pruned
//! by the channel on the next send.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Capacities of the pipeline topics.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Normalized quote topic.
    pub quotes_capacity: usize,
    /// Spread event topic.
    pub spreads_capacity: usize,
    /// Triangular opportunity topic.
    pub opportunities_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            quotes_capacity: 10_000,
            spreads_capacity: 10_000,
            opportunities_capacity: 1_000,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Named broadcast topic.
///
/// # Example
///
/// ```rust
/// use arbitrage_engine::infrastructure::broadcast::EventBus;
///
/// let bus = EventBus::new("spreads", 16);
/// let mut sub = bus.subscribe();
/// assert_eq!(bus.publish(7u32), Some(1));
/// ```
#[derive(Debug)]
pub struct EventBus<T> {
    topic: &'static str,
    tx: broadcast::Sender<T>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic,
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a topic holding at most `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(topic: &'static str, capacity: usize) -> Self {
        Self {
            topic,
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Publish to every current subscriber.
    ///
    /// Returns the number of subscribers reached, or `None` if there are none.
    pub fn publish(&self, event: T) -> Option<usize> {
        self.tx.send(event).ok()
    }

    /// Start an independent subscription that sees events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            topic: self.topic,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One subscriber's view of a topic.
///
/// Dropping it unsubscribes without affecting the producer or other
/// subscribers.
#[derive(Debug)]
pub struct Subscription<T> {
    topic: &'static str,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Next event, skipping over lag. `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => record_lag(self.topic, skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream` with the same lag handling.
    #[must_use]
    pub fn into_stream(self) -> SubscriptionStream<T> {
        SubscriptionStream {
            topic: self.topic,
            inner: BroadcastStream::new(self.rx),
        }
    }
}

/// Stream adapter for a [`Subscription`].
pub struct SubscriptionStream<T> {
    topic: &'static str,
    inner: BroadcastStream<T>,
}

impl<T: Clone + Send + 'static> Stream for SubscriptionStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    record_lag(self.topic, skipped);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn record_lag(topic: &'static str, skipped: u64) {
    tracing::warn!(topic, skipped, "Subscriber lagged, oldest events dropped");
    metrics::record_dropped_events(topic, skipped);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn receiver_count_tracks_subscriptions() {
        let bus: EventBus<u32> = EventBus::new("test", 8);
        assert_eq!(bus.receiver_count(), 0);
        {
            let _a = bus.subscribe();
            let _b = bus.subscribe();
            assert_eq!(bus.receiver_count(), 2);
        }
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn publish_without_subscribers_returns_none() {
        let bus: EventBus<u32> = EventBus::new("test", 8);
        assert!(bus.publish(1).is_none());
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::new("test", 8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(1u32), Some(2));
        assert_eq!(bus.publish(2u32), Some(2));

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[tokio::test]
    async fn dropping_one_subscriber_leaves_the_other() {
        let bus = EventBus::new("test", 8);
        let a = bus.subscribe();
        let mut b = bus.subscribe();
        drop(a);

        assert_eq!(bus.publish(5u32), Some(1));
        assert_eq!(b.recv().await, Some(5));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest() {
        let bus = EventBus::new("test", 2);
        let mut sub = bus.subscribe();
        for i in 0..5u32 {
            bus.publish(i);
        }
        assert_eq!(sub.recv().await, Some(3));
        assert_eq!(sub.recv().await, Some(4));
    }

    #[tokio::test]
    async fn closed_topic_ends_subscription() {
        let bus = EventBus::new("test", 2);
        let mut sub = bus.subscribe();
        bus.publish(1u32);
        drop(bus);

        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn stream_adapter_skips_lag() {
        let bus = EventBus::new("test", 2);
        let stream = bus.subscribe().into_stream();
        for i in 0..4u32 {
            bus.publish(i);
        }
        drop(bus);

        let events: Vec<u32> = stream.collect().await;
        assert_eq!(events, vec![2, 3]);
    }
}
