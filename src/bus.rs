//! Notification bus: per-owner fan-out to live subscriber channels.
//!
//! The bus is deliberately lossy for slow consumers: each subscriber
//! channel holds a small bounded buffer and overflow drops the oldest
//! undelivered payload in favor of the newest. The durable store is
//! the source of truth for history; the bus only serves live sessions.
//!
//! Cross-owner isolation is absolute — topics are keyed by owner and a
//! payload published for one owner is never observable under another.

use crate::ledger::now_epoch_millis;
use crate::reminder::{OwnerId, ReminderEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;

/// What a subscriber observes next on its channel.
#[derive(Debug)]
pub enum BusMessage {
    /// A payload published for this owner.
    Payload(ReminderEvent),
    /// The subscriber fell behind; this many oldest payloads were
    /// dropped in favor of newer ones. Not a connection-level error.
    Lagged(u64),
    /// The topic is gone; no further payloads will arrive.
    Closed,
}

/// Live subscription to one owner's topic.
///
/// Ephemeral by contract: never persisted, destroyed on drop. Dropping
/// unregisters the channel; a publish racing the drop is a no-op, not
/// an error.
pub struct OwnerSubscription {
    owner: OwnerId,
    connection_id: Uuid,
    created_at_ms: u64,
    receiver: broadcast::Receiver<ReminderEvent>,
    overflow: Arc<AtomicU64>,
}

impl OwnerSubscription {
    /// The owner this subscription is registered under.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Unique id of this connection.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Epoch milliseconds at registration.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Wait for the next message on this channel.
    ///
    /// Buffer overflow is recorded on the bus-wide metric and surfaced
    /// as [`BusMessage::Lagged`] so the caller can keep consuming.
    pub async fn next_message(&mut self) -> BusMessage {
        match self.receiver.recv().await {
            Ok(payload) => BusMessage::Payload(payload),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                self.overflow.fetch_add(skipped, Ordering::Relaxed);
                BusMessage::Lagged(skipped)
            }
            Err(broadcast::error::RecvError::Closed) => BusMessage::Closed,
        }
    }
}

/// Per-owner publish/subscribe fan-out.
///
/// Modeled as a trait so a distributed implementation can replace the
/// in-memory default without changing callers.
pub trait NotificationBus: Send + Sync {
    /// Fan `payload` out to every channel currently registered under
    /// `owner`. Returns the number of channels that received it; zero
    /// subscribers is a no-op.
    fn publish(&self, owner: OwnerId, payload: ReminderEvent) -> usize;

    /// Register a new subscriber channel under `owner`.
    fn subscribe(&self, owner: OwnerId) -> OwnerSubscription;
}

/// In-memory bus backed by one broadcast channel per owner.
pub struct InMemoryBus {
    capacity: usize,
    topics: Mutex<HashMap<OwnerId, broadcast::Sender<ReminderEvent>>>,
    overflow: Arc<AtomicU64>,
}

impl InMemoryBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
            overflow: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total payloads dropped to overflow across all subscribers.
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Live subscriber count for an owner.
    pub fn subscriber_count(&self, owner: OwnerId) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(&owner)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl NotificationBus for InMemoryBus {
    fn publish(&self, owner: OwnerId, payload: ReminderEvent) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = topics.get(&owner) else {
            return 0;
        };
        match sender.send(payload) {
            Ok(delivered) => delivered,
            Err(_) => {
                // Every receiver has dropped; garbage-collect the topic.
                topics.remove(&owner);
                0
            }
        }
    }

    fn subscribe(&self, owner: OwnerId) -> OwnerSubscription {
        let receiver = {
            let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            topics
                .entry(owner)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        OwnerSubscription {
            owner,
            connection_id: Uuid::new_v4(),
            created_at_ms: now_epoch_millis(),
            receiver,
            overflow: Arc::clone(&self.overflow),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    fn event(id: i64) -> ReminderEvent {
        ReminderEvent {
            reminder_id: id,
            title: "t".to_owned(),
            message: "m".to_owned(),
            tipe: "Harian".to_owned(),
            scheduled_at: "2024-01-01T08:00:00+07:00".to_owned(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_owner_subscriber() {
        let bus = InMemoryBus::default();
        let mut a = bus.subscribe(OwnerId(1));
        let mut b = bus.subscribe(OwnerId(1));

        assert_eq!(bus.publish(OwnerId(1), event(7)), 2);

        for sub in [&mut a, &mut b] {
            match sub.next_message().await {
                BusMessage::Payload(payload) => assert_eq!(payload.reminder_id, 7),
                other => panic!("expected payload, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn cross_owner_isolation_is_absolute() {
        let bus = InMemoryBus::default();
        let mut other = bus.subscribe(OwnerId(2));
        let _own = bus.subscribe(OwnerId(1));

        bus.publish(OwnerId(1), event(7));

        let observed =
            tokio::time::timeout(Duration::from_millis(50), other.next_message()).await;
        assert!(observed.is_err(), "owner 2 must not observe owner 1 payloads");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = InMemoryBus::default();
        assert_eq!(bus.publish(OwnerId(9), event(1)), 0);
    }

    #[tokio::test]
    async fn subscribe_then_drop_then_publish_does_not_deliver() {
        let bus = InMemoryBus::default();
        let sub = bus.subscribe(OwnerId(3));
        drop(sub);

        assert_eq!(bus.publish(OwnerId(3), event(1)), 0);
        // Topic was garbage-collected; a later publish stays a no-op.
        assert_eq!(bus.publish(OwnerId(3), event(2)), 0);
        assert_eq!(bus.subscriber_count(OwnerId(3)), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_the_loss() {
        let bus = InMemoryBus::new(4);
        let mut sub = bus.subscribe(OwnerId(1));

        for i in 1..=10 {
            bus.publish(OwnerId(1), event(i));
        }

        match sub.next_message().await {
            BusMessage::Lagged(skipped) => assert_eq!(skipped, 6),
            other => panic!("expected lag notice, got {other:?}"),
        }
        assert_eq!(bus.overflow_dropped(), 6);

        // The survivors are the newest payloads, oldest-first.
        match sub.next_message().await {
            BusMessage::Payload(payload) => assert_eq!(payload.reminder_id, 7),
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscription_carries_identity() {
        let bus = InMemoryBus::default();
        let a = bus.subscribe(OwnerId(5));
        let b = bus.subscribe(OwnerId(5));
        assert_eq!(a.owner(), OwnerId(5));
        assert_ne!(a.connection_id(), b.connection_id());
        assert!(a.created_at_ms() > 0);
    }
}
