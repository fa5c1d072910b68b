//! Subscriber registry
//!
//! Registration and removal happen under a short `parking_lot` lock so that
//! unsubscribing is synchronous for the caller; delivery is a non-blocking
//! send on each subscriber's unbounded channel.

use parking_lot::Mutex;
use presence_core::{ActivityEvent, TopicId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Item delivered to topic subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TopicUpdate {
    Event(ActivityEvent),
    /// A sequence gap could not be closed; events after `since` are being
    /// re-fetched from history
    ResyncRequired { since: u64 },
}

type Subscribers = HashMap<TopicId, Vec<(u64, mpsc::UnboundedSender<TopicUpdate>)>>;

/// Per-topic subscriber lists
#[derive(Debug, Default)]
pub struct FanoutHub {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl FanoutHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscriber for `topic_id`
    pub fn subscribe(self: &Arc<Self>, topic_id: &TopicId) -> FanoutSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers
            .lock()
            .entry(topic_id.clone())
            .or_default()
            .push((id, tx));

        tracing::debug!(topic_id = %topic_id, subscriber = id, "Fanout subscriber added");

        FanoutSubscription {
            hub: Arc::downgrade(self),
            topic_id: topic_id.clone(),
            id,
            rx,
        }
    }

    /// Deliver `update` to every subscriber of `topic_id`; returns how many received it
    pub fn dispatch(&self, topic_id: &TopicId, update: &TopicUpdate) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(topic_id) else {
            return 0;
        };

        list.retain(|(_, tx)| tx.send(update.clone()).is_ok());
        let delivered = list.len();
        if list.is_empty() {
            subscribers.remove(topic_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, topic_id: &TopicId) -> usize {
        self.subscribers
            .lock()
            .get(topic_id)
            .map_or(0, Vec::len)
    }

    fn remove(&self, topic_id: &TopicId, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(topic_id) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subscribers.remove(topic_id);
            }
        }
        tracing::debug!(topic_id = %topic_id, subscriber = id, "Fanout subscriber removed");
    }
}

/// Receiving end of a topic subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct FanoutSubscription {
    hub: Weak<FanoutHub>,
    topic_id: TopicId,
    id: u64,
    rx: mpsc::UnboundedReceiver<TopicUpdate>,
}

impl FanoutSubscription {
    pub fn topic_id(&self) -> &TopicId {
        &self.topic_id
    }

    /// Next update; `None` once the engine has shut down
    pub async fn recv(&mut self) -> Option<TopicUpdate> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TopicUpdate> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<TopicUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            updates.push(update);
        }
        updates
    }
}

impl Drop for FanoutSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.topic_id, self.id);
        }
    }
}
