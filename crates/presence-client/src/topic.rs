//! Per-topic handle
//!
//! Holding a [`TopicHandle`] means "this UI is looking at the topic": the
//! local user is present and the topic's events are flowing. Dropping it
//! leaves and unsubscribes, so an early return or an unwinding panic cannot
//! leak a subscription.

use crate::client::ErrorSignal;
use presence_common::{AppError, AppResult, ErrorReport};
use presence_core::{DomainError, PresenceEntry, ReactionCount, TopicId, UserId};
use presence_engine::{EngineHandle, FanoutSubscription, TopicFeed, TopicUpdate, TopicView};
use presence_transport::Subscription;
use std::fmt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct TopicHandle {
    topic_id: TopicId,
    me: UserId,
    engine: EngineHandle,
    updates: FanoutSubscription,
    view: watch::Receiver<TopicView>,
    subscription: Option<Subscription>,
    heartbeat: JoinHandle<()>,
    errors: ErrorSignal,
}

impl TopicHandle {
    pub(crate) fn new(
        topic_id: TopicId,
        engine: EngineHandle,
        feed: TopicFeed,
        subscription: Subscription,
        heartbeat: JoinHandle<()>,
        errors: ErrorSignal,
    ) -> Self {
        Self {
            topic_id,
            me: engine.local_user().id.clone(),
            engine,
            updates: feed.updates,
            view: feed.view,
            subscription: Some(subscription),
            heartbeat,
            errors,
        }
    }

    pub fn topic_id(&self) -> &TopicId {
        &self.topic_id
    }

    /// Present users, ordered by join time
    pub fn presence(&self) -> Vec<PresenceEntry> {
        self.view.borrow().presence.clone()
    }

    /// Users typing right now, never including the local user
    pub fn typing_users(&self) -> Vec<UserId> {
        self.view.borrow().typing_users_except(&self.me)
    }

    /// Reaction counts for one message
    pub fn reactions(&self, message_id: &str) -> Vec<ReactionCount> {
        self.view
            .borrow()
            .reactions
            .get(message_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Full snapshot of the topic
    pub fn view(&self) -> TopicView {
        self.view.borrow().clone()
    }

    pub fn send_message(&self, content: impl Into<String>) -> AppResult<()> {
        self.engine
            .send_message(&self.topic_id, content)
            .map_err(AppError::from)
    }

    pub fn start_typing(&self) -> AppResult<()> {
        self.engine.start_typing(&self.topic_id).map_err(AppError::from)
    }

    pub fn stop_typing(&self) -> AppResult<()> {
        self.engine.stop_typing(&self.topic_id).map_err(AppError::from)
    }

    /// Toggle the local user's `emoji` reaction on `message_id`
    pub fn react(&self, message_id: impl Into<String>, emoji: impl Into<String>) -> AppResult<()> {
        self.engine
            .react(&self.topic_id, message_id, emoji)
            .map_err(AppError::from)
    }

    /// The newer of the topic's error (failed resync) and the client's
    /// (connection, auth, publish)
    pub fn last_error(&self) -> Option<ErrorReport> {
        let topic_error = self.view.borrow().last_error.clone();
        match (topic_error, self.errors.current()) {
            (Some(topic), Some(client)) => Some(if client.at > topic.at { client } else { topic }),
            (topic, client) => topic.or(client),
        }
    }

    /// Ordered event stream for this topic
    pub fn updates(&mut self) -> &mut FanoutSubscription {
        &mut self.updates
    }

    /// Next event; `None` once the engine has stopped
    pub async fn next_update(&mut self) -> Option<TopicUpdate> {
        self.updates.recv().await
    }

    /// Wait for the view to change and return it
    pub async fn changed(&mut self) -> AppResult<TopicView> {
        self.view
            .changed()
            .await
            .map_err(|_| AppError::from(DomainError::EngineStopped))?;
        Ok(self.view.borrow_and_update().clone())
    }

    /// Leave and unsubscribe now
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        self.heartbeat.abort();

        tracing::info!(topic_id = %self.topic_id, "Topic closed");
        // The transport subscription is dropped by the engine once the
        // leave is sent; if the engine is gone it is dropped here.
        if self
            .engine
            .leave_and_release(&self.topic_id, subscription)
            .is_err()
        {
            tracing::trace!(topic_id = %self.topic_id, "Engine stopped before leave");
        }
    }
}

impl Drop for TopicHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for TopicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicHandle")
            .field("topic_id", &self.topic_id)
            .field("open", &self.subscription.is_some())
            .finish()
    }
}
