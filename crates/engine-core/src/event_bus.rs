//! In-process publish/subscribe for progress and lifecycle events.
//!
//! Subscribers register a bounded channel per event type. Publishing never
//! waits: a subscriber whose channel is full misses the event.

use model::events::Event;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

type Senders = HashMap<TypeId, HashMap<u64, Box<dyn Any + Send + Sync>>>;

#[derive(Debug, Clone)]
pub struct Subscription {
    event_type_id: TypeId,
    subscriber_id: u64,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Senders>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<E>(&self, sender: mpsc::Sender<Arc<E>>) -> Subscription
    where
        E: Event + Clone,
    {
        let event_type_id = TypeId::of::<E>();
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(event_type_id)
            .or_default()
            .insert(subscriber_id, Box::new(sender));

        debug!(
            event_type = std::any::type_name::<E>(),
            subscriber_id, "Subscribed to event"
        );

        Subscription {
            event_type_id,
            subscriber_id,
        }
    }

    /// Subscribes a fresh channel of `capacity` events.
    pub async fn channel<E>(&self, capacity: usize) -> (Subscription, mpsc::Receiver<Arc<E>>)
    where
        E: Event + Clone,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.subscribe(tx).await, rx)
    }

    pub async fn publish<E>(&self, event: E)
    where
        E: Event + Clone,
    {
        let event = Arc::new(event);
        let subscribers = self.subscribers.read().await;

        let Some(senders) = subscribers.get(&TypeId::of::<E>()) else {
            return;
        };

        for (subscriber_id, boxed) in senders {
            let Some(sender) = boxed.downcast_ref::<mpsc::Sender<Arc<E>>>() else {
                warn!(
                    event_type = event.event_type(),
                    subscriber_id, "Failed to downcast sender for subscriber"
                );
                continue;
            };
            if let Err(e) = sender.try_send(event.clone()) {
                debug!(
                    event_type = event.event_type(),
                    subscriber_id,
                    error = %e,
                    "Dropped event for subscriber"
                );
            }
        }
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self.subscribers.write().await;

        if let Some(senders) = subscribers.get_mut(&subscription.event_type_id) {
            senders.remove(&subscription.subscriber_id);
            if senders.is_empty() {
                subscribers.remove(&subscription.event_type_id);
            }
        }
    }

    pub async fn subscriber_count<E>(&self) -> usize
    where
        E: Event,
    {
        self.subscribers
            .read()
            .await
            .get(&TypeId::of::<E>())
            .map_or(0, HashMap::len)
    }
}
