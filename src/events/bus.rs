//! Fan-out event bus with a bounded, drop-oldest buffer per subscriber.
//!
//! Every subscriber owns a private `broadcast` channel. `publish` pushes
//! into each matching channel without awaiting, so a slow consumer only
//! ever loses its own oldest events; it never stalls the publisher or the
//! other subscribers.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::AgentEvent;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

struct Slot {
    run_filter: Option<String>,
    tx: broadcast::Sender<Arc<AgentEvent>>,
}

struct Inner {
    subscribers: DashMap<u64, Slot>,
    next_id: AtomicU64,
    published: AtomicU64,
    capacity: usize,
}

impl Inner {
    fn remove(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = id, "event subscriber removed");
        }
    }
}

/// Cheaply cloneable handle to a shared bus.
///
/// Subscriptions do not keep the bus alive: once the last handle is dropped
/// every subscriber's stream ends.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Publish an event to every matching subscriber. Never blocks, never fails.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn publish(&self, event: AgentEvent) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(event);
        let mut delivered = 0;
        for slot in self.inner.subscribers.iter() {
            let matches = slot
                .run_filter
                .as_deref()
                .is_none_or(|run_id| run_id == event.run_id);
            if matches && slot.tx.send(Arc::clone(&event)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Subscribe to events published from now on, optionally for one run only.
    pub fn subscribe(&self, run_id: Option<&str>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(self.inner.capacity);
        self.inner.subscribers.insert(
            id,
            Slot {
                run_filter: run_id.map(str::to_string),
                tx,
            },
        );
        tracing::debug!(subscriber = id, run_id = ?run_id, "event subscriber added");
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
            dropped: 0,
        }
    }

    /// Release a subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-subscriber ordered stream of events.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<Arc<AgentEvent>>,
    bus: Weak<Inner>,
    dropped: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. Returns `None` once every [`EventBus`]
    /// handle has been dropped.
    ///
    /// If this subscriber fell behind, its oldest buffered events were
    /// evicted; they are counted in [`Subscription::dropped`] and skipped.
    pub async fn recv(&mut self) -> Option<Arc<AgentEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<AgentEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Total events evicted from this subscriber's buffer.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, n: u64) {
        self.dropped += n;
        tracing::warn!(
            subscriber = self.id,
            evicted = n,
            "event subscriber lagging; oldest events dropped"
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(run_id: &str, iteration: u32) -> AgentEvent {
        AgentEvent::step_start(run_id, iteration, "plan")
    }

    #[test]
    fn test_publish_with_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(step("r1", 0)), 0);
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(None);
        let mut b = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 2);

        for i in 0..3 {
            assert_eq!(bus.publish(step("r1", i)), 2);
        }
        for sub in [&mut a, &mut b] {
            for i in 0..3 {
                assert_eq!(sub.recv().await.unwrap().iteration, i);
            }
        }
    }

    #[tokio::test]
    async fn test_run_filter() {
        let bus = EventBus::new();
        let mut only_r2 = bus.subscribe(Some("r2"));
        bus.publish(step("r1", 0));
        bus.publish(step("r2", 5));
        let event = only_r2.recv().await.unwrap();
        assert_eq!(event.run_id, "r2");
        assert_eq!(event.iteration, 5);
        assert!(only_r2.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_without_affecting_others() {
        let bus = EventBus::with_capacity(2);
        let mut slow = bus.subscribe(None);
        let mut fast = bus.subscribe(None);

        bus.publish(step("r1", 0));
        assert_eq!(fast.recv().await.unwrap().iteration, 0);
        bus.publish(step("r1", 1));
        assert_eq!(fast.recv().await.unwrap().iteration, 1);
        bus.publish(step("r1", 2));
        assert_eq!(fast.recv().await.unwrap().iteration, 2);

        // slow never drained: the oldest event was evicted
        assert_eq!(slow.recv().await.unwrap().iteration, 1);
        assert_eq!(slow.recv().await.unwrap().iteration, 2);
        assert_eq!(slow.dropped(), 1);
        assert_eq!(fast.dropped(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_events_after_subscribing() {
        let bus = EventBus::new();
        bus.publish(step("r1", 0));
        let mut sub = bus.subscribe(None);
        bus.publish(step("r1", 1));
        assert_eq!(sub.recv().await.unwrap().iteration, 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_is_dropped() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        bus.publish(step("r1", 0));
        drop(bus);

        // buffered events are still delivered first
        assert_eq!(sub.recv().await.unwrap().iteration, 0);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None);
        let other = bus.subscribe(Some("r1"));
        assert_eq!(bus.subscriber_count(), 2);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(other);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let bus = EventBus::with_capacity(0);
        assert_eq!(bus.capacity(), 1);
    }
}
