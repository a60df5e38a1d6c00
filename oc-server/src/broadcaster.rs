//! Broadcaster Registry (C5) — `spec.md` §4.5.
//!
//! Process-wide mapping from topic string to observer set, guarded by one
//! registry-wide lock; observers are invoked outside the lock to avoid
//! fan-out stalls (`spec.md` §5). Modeled as an explicit singleton owned
//! by the composition root (`spec.md` §9) — not a module global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

type SubscriberId = u64;

struct Topic {
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<()>>,
}

#[derive(Default)]
pub struct BroadcasterRegistry {
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

/// Returned by [`BroadcasterRegistry::subscribe`]. Dropping it removes the
/// subscription — the teacher's/spec's "observer lifetime" note: do not
/// retain raw references that would keep a closed socket alive.
pub struct Subscription {
    registry: std::sync::Weak<BroadcasterRegistry>,
    topic: String,
    id: SubscriberId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.topic, self.id);
        }
    }
}

impl BroadcasterRegistry {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Subscribe to `topic`. Returns the notification receiver plus an
    /// unsubscribe handle (dropping the handle unsubscribes).
    ///
    /// Invariant (`spec.md` §4.5): a `subscribe` that happens-before a
    /// `notify` is never a lost notification, because the sender is
    /// registered in the topic map before this call returns.
    pub fn subscribe(
        self: &std::sync::Arc<Self>,
        topic: impl Into<String>,
    ) -> (mpsc::UnboundedReceiver<()>, Subscription) {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.topics
            .lock()
            .unwrap()
            .entry(topic.clone())
            .or_insert_with(|| Topic {
                subscribers: HashMap::new(),
            })
            .subscribers
            .insert(id, tx);

        let sub = Subscription {
            registry: std::sync::Arc::downgrade(self),
            topic,
            id,
        };
        (rx, sub)
    }

    fn unsubscribe(&self, topic: &str, id: SubscriberId) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(t) = topics.get_mut(topic) {
            t.subscribers.remove(&id);
            if t.subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Invoke every current subscriber for `topic`. Handler failures (a
    /// receiver dropped without unsubscribing, e.g. mid-race) do not
    /// prevent subsequent handlers from running — each is an independent
    /// `send`.
    pub fn notify(&self, topic: &str) {
        let senders: Vec<mpsc::UnboundedSender<()>> = {
            let topics = self.topics.lock().unwrap();
            match topics.get(topic) {
                Some(t) => t.subscribers.values().cloned().collect(),
                None => return,
            }
        };
        for sender in senders {
            let _ = sender.send(());
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }
}
