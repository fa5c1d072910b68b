//! Engine state
//!
//! All presence, typing, ordering and reaction state lives here and is only
//! touched through `&mut self`, so the owning task is the single writer. Every
//! operation is synchronous and takes the current time as an argument; side
//! effects that need I/O are returned as [`Effect`]s for the runtime to run.

use super::config::EngineConfig;
use super::view::TopicView;
use crate::fanout::{Admission, FanoutHub, FanoutSubscription, TopicSequencer, TopicUpdate};
use crate::presence::PresenceTracker;
use crate::typing::{TypingDebouncer, TypingMachine};
use presence_common::{AppError, ErrorReport};
use presence_core::{
    ActivityEvent, ActivityKind, HistoryError, ReactionBoard, ReactionPayload, TopicId, UserId,
    UserRef,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Work the runtime performs on the engine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a locally originated event to the backend
    Publish { topic_id: TopicId, event: ActivityEvent },
    /// Fetch events after `since` from the history API
    FetchHistory { topic_id: TopicId, since: u64 },
}

struct TopicState {
    sequencer: TopicSequencer,
    reactions: ReactionBoard,
    outbound_seq: u64,
    /// Open local handles; the user is announced while this is above zero
    local_mounts: usize,
    /// When the local user was last announced on the wire
    announced_at: Option<i64>,
    idle_since: Option<i64>,
    last_error: Option<ErrorReport>,
    view: watch::Sender<TopicView>,
}

pub struct EngineState {
    config: EngineConfig,
    local_user: UserRef,
    hub: Arc<FanoutHub>,
    presence: PresenceTracker,
    typing: TypingMachine,
    debouncer: TypingDebouncer,
    topics: HashMap<TopicId, TopicState>,
    /// Ids of events this client published, for echo suppression
    published: VecDeque<Uuid>,
    published_set: HashSet<Uuid>,
}

impl EngineState {
    pub fn new(config: EngineConfig, local_user: UserRef, hub: Arc<FanoutHub>) -> Self {
        Self {
            presence: PresenceTracker::new(config.presence.presence_timeout_ms),
            typing: TypingMachine::new(config.typing.typing_timeout_ms),
            debouncer: TypingDebouncer::new(config.typing.typing_debounce_ms),
            config,
            local_user,
            hub,
            topics: HashMap::new(),
            published: VecDeque::new(),
            published_set: HashSet::new(),
        }
    }

    pub fn local_user(&self) -> &UserRef {
        &self.local_user
    }

    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    /// Register a subscriber for `topic_id` and hand back its view
    pub fn open_topic(&mut self, topic_id: &TopicId) -> (FanoutSubscription, watch::Receiver<TopicView>) {
        self.open_topic_at(topic_id, None)
    }

    /// Register a subscriber, seeding the sequencer with `baseline`
    ///
    /// The baseline only applies while the topic has not delivered anything
    /// yet; an established cursor is never moved.
    pub fn open_topic_at(
        &mut self,
        topic_id: &TopicId,
        baseline: Option<u64>,
    ) -> (FanoutSubscription, watch::Receiver<TopicView>) {
        let subscription = self.hub.subscribe(topic_id);
        let fanout = self.config.fanout.clone();
        let state = self.topic_mut(topic_id);
        state.idle_since = None;
        if let Some(seq) = baseline {
            if state.sequencer.cursor().is_none() && state.sequencer.buffered() == 0 {
                state.sequencer = TopicSequencer::with_baseline(&fanout, seq);
            }
        }
        (subscription, state.view.subscribe())
    }

    /// Current view of `topic_id`, if the engine knows it
    pub fn view(&self, topic_id: &TopicId) -> Option<TopicView> {
        self.topics.get(topic_id).map(|state| state.view.borrow().clone())
    }

    pub fn has_topic(&self, topic_id: &TopicId) -> bool {
        self.topics.contains_key(topic_id)
    }

    // ---- inbound ----

    /// Feed an event received from the transport
    pub fn ingest(&mut self, event: ActivityEvent, now: i64) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Err(e) = event.validate() {
            tracing::warn!(error = %e, "Dropping invalid inbound event");
            return effects;
        }

        let topic_id = event.topic_id.clone();
        let seq = event.seq;

        if seq == 0 {
            // Unsequenced events carry no ordering information.
            self.topic_mut(&topic_id);
            self.apply(event, now);
        } else {
            match self.topic_mut(&topic_id).sequencer.push(event, now) {
                Admission::Release(events) => {
                    for event in events {
                        self.apply(event, now);
                    }
                }
                Admission::Buffered => {
                    tracing::trace!(topic_id = %topic_id, seq, "Buffered out-of-order event");
                }
                Admission::Duplicate => {
                    tracing::debug!(topic_id = %topic_id, seq, "Dropping duplicate event");
                }
                Admission::Stale => {
                    tracing::debug!(topic_id = %topic_id, seq, "Dropping stale event");
                }
                Admission::Overflow => {
                    tracing::warn!(topic_id = %topic_id, seq, "Resync buffer full, dropping event");
                }
                Admission::Resync { since } => self.begin_resync(&topic_id, since, &mut effects),
            }
        }

        self.refresh_view(&topic_id);
        effects
    }

    /// Finish a resync started by [`Effect::FetchHistory`]
    pub fn complete_resync(
        &mut self,
        topic_id: &TopicId,
        result: Result<Vec<ActivityEvent>, HistoryError>,
        now: i64,
    ) {
        let Some(state) = self.topics.get_mut(topic_id) else {
            return;
        };
        if !state.sequencer.is_resyncing() {
            return;
        }

        let fetched = match result {
            Ok(events) => {
                tracing::info!(topic_id = %topic_id, fetched = events.len(), "Resync completed");
                state.last_error = None;
                events
                    .into_iter()
                    .filter(|e| e.topic_id == *topic_id && e.validate().is_ok())
                    .collect()
            }
            Err(err) => {
                tracing::warn!(topic_id = %topic_id, error = %err, "Resync failed, skipping gap");
                state.last_error = Some(ErrorReport::new(&AppError::History(err), now));
                Vec::new()
            }
        };

        for event in state.sequencer.complete_resync(fetched) {
            self.apply(event, now);
        }
        self.refresh_view(topic_id);
    }

    fn begin_resync(&mut self, topic_id: &TopicId, since: u64, effects: &mut Vec<Effect>) {
        tracing::info!(topic_id = %topic_id, since, "Resyncing from history");
        self.hub
            .dispatch(topic_id, &TopicUpdate::ResyncRequired { since });
        effects.push(Effect::FetchHistory {
            topic_id: topic_id.clone(),
            since,
        });
    }

    /// Apply a released inbound event to the state machines
    fn apply(&mut self, event: ActivityEvent, now: i64) {
        if self.published_set.contains(&event.id) {
            tracing::trace!(event_id = %event.id, "Suppressing echo of own event");
            return;
        }

        let topic_id = event.topic_id.clone();
        let user_id = event.user_id.clone();
        let seq = (event.seq > 0).then_some(event.seq);

        match event.kind {
            ActivityKind::Join => {
                if self.presence.join(&topic_id, event.user_ref(), now, seq) {
                    self.emit(event);
                }
            }
            ActivityKind::Leave => {
                if self.presence.is_stale(&topic_id, &user_id, seq) {
                    tracing::debug!(topic_id = %topic_id, user_id = %user_id, ?seq, "Dropping stale leave");
                    return;
                }
                if self.typing.stop(&topic_id, &user_id) {
                    self.emit_synthetic(&topic_id, ActivityKind::TypingStop, &user_id, event.timestamp);
                }
                if self.presence.leave(&topic_id, &user_id, seq).is_some() {
                    self.emit(event);
                }
            }
            ActivityKind::TypingStart => {
                self.presence.heartbeat(&topic_id, &user_id, now, None);
                if self.typing.start(&topic_id, &user_id, now) {
                    self.emit(event);
                }
            }
            ActivityKind::TypingStop => {
                if self.typing.stop(&topic_id, &user_id) {
                    self.emit(event);
                }
            }
            ActivityKind::Message => {
                if self.typing.stop(&topic_id, &user_id) {
                    self.emit_synthetic(&topic_id, ActivityKind::TypingStop, &user_id, event.timestamp);
                }
                self.presence.heartbeat(&topic_id, &user_id, now, None);
                self.emit(event);
            }
            ActivityKind::Reaction => {
                let Some(reaction) = event.reaction() else {
                    tracing::warn!(event_id = %event.id, "Reaction without payload");
                    return;
                };
                let change = self
                    .topic_mut(&topic_id)
                    .reactions
                    .toggle(&reaction.message_id, &user_id, &reaction.emoji);
                tracing::trace!(topic_id = %topic_id, ?change, "Reaction applied");
                self.presence.heartbeat(&topic_id, &user_id, now, None);
                self.emit(event);
            }
        }
    }

    // ---- local operations ----

    /// Announce the local user in `topic_id`
    ///
    /// Mounts are counted: only the first announces, later ones share it.
    pub fn join(&mut self, topic_id: &TopicId, now: i64) -> Vec<Effect> {
        let state = self.topic_mut(topic_id);
        state.local_mounts += 1;
        if state.local_mounts > 1 {
            tracing::debug!(topic_id = %topic_id, mounts = state.local_mounts, "Topic already joined locally");
            return Vec::new();
        }

        let effects = vec![self.announce(topic_id, now)];
        self.refresh_view(topic_id);
        effects
    }

    /// Release one local mount; the last one removes the local user
    pub fn leave(&mut self, topic_id: &TopicId, now: i64) -> Vec<Effect> {
        let Some(state) = self.topics.get_mut(topic_id) else {
            return Vec::new();
        };
        match state.local_mounts {
            0 => return Vec::new(),
            1 => {
                state.local_mounts = 0;
                state.announced_at = None;
            }
            _ => {
                state.local_mounts -= 1;
                tracing::debug!(topic_id = %topic_id, mounts = state.local_mounts, "Topic still mounted locally");
                return Vec::new();
            }
        }

        let mut effects = Vec::new();
        let me = self.local_user.id.clone();

        if self.typing.stop(topic_id, &me) {
            self.debouncer.reset(topic_id);
            let stop = self.local_event(topic_id, ActivityKind::TypingStop, now, None);
            self.emit_local(&stop);
            effects.push(self.publish(stop));
        }

        let event = self.local_event(topic_id, ActivityKind::Leave, now, None);
        if self.presence.leave(topic_id, &me, None).is_some() {
            self.emit_local(&event);
        }
        effects.push(self.publish(event));

        self.refresh_view(topic_id);
        effects
    }

    /// Keep the local user's presence alive locally and remotely
    ///
    /// Re-announces with a `join`, which remote trackers treat as a refresh.
    /// Every mount runs its own heartbeat, so announces closer together than
    /// half the heartbeat interval are skipped.
    pub fn heartbeat(&mut self, topic_id: &TopicId, now: i64) -> Vec<Effect> {
        let me = self.local_user.id.clone();
        let min_gap = i64::try_from(self.config.presence.heartbeat_interval_ms / 2).unwrap_or(i64::MAX);
        let Some(state) = self.topics.get(topic_id) else {
            return Vec::new();
        };
        if state.local_mounts == 0 || state.announced_at.is_some_and(|at| now - at < min_gap) {
            return Vec::new();
        }
        if !self.presence.heartbeat(topic_id, &me, now, None) {
            return Vec::new();
        }

        let effects = vec![self.announce(topic_id, now)];
        self.refresh_view(topic_id);
        effects
    }

    /// Catch up after the link came back
    ///
    /// Events published while offline never reached this client. Every topic
    /// that has delivered something replays history from its cursor, and
    /// locally mounted topics announce the user again.
    pub fn resume(&mut self, now: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        let topic_ids: Vec<TopicId> = self.topics.keys().cloned().collect();

        for topic_id in topic_ids {
            let Some(state) = self.topics.get_mut(&topic_id) else {
                continue;
            };
            let mounted = state.local_mounts > 0;
            if let Some(since) = state.sequencer.begin_resync() {
                self.begin_resync(&topic_id, since, &mut effects);
            }
            if mounted {
                effects.push(self.announce(&topic_id, now));
            }
            self.refresh_view(&topic_id);
        }
        effects
    }

    /// Local keystroke: state updates now, the wire sees at most one start per window
    pub fn start_typing(&mut self, topic_id: &TopicId, now: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        let me = self.local_user.id.clone();

        let event = self.local_event(topic_id, ActivityKind::TypingStart, now, None);
        if self.typing.start(topic_id, &me, now) {
            self.emit_local(&event);
        }
        if self.debouncer.should_send(topic_id, now) {
            effects.push(self.publish(event));
        }

        self.refresh_view(topic_id);
        effects
    }

    pub fn stop_typing(&mut self, topic_id: &TopicId, now: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        let me = self.local_user.id.clone();

        if self.typing.stop(topic_id, &me) {
            self.debouncer.reset(topic_id);
            let event = self.local_event(topic_id, ActivityKind::TypingStop, now, None);
            self.emit_local(&event);
            effects.push(self.publish(event));
            self.refresh_view(topic_id);
        }
        effects
    }

    /// Send a chat message; stops local typing first
    ///
    /// The implicit `typingStop` is dispatched locally before the message but
    /// not published: remote peers stop the indicator when the message lands.
    pub fn send_message(&mut self, topic_id: &TopicId, content: &str, now: i64) -> Vec<Effect> {
        let me = self.local_user.id.clone();

        if self.typing.stop(topic_id, &me) {
            self.debouncer.reset(topic_id);
            self.emit_synthetic(topic_id, ActivityKind::TypingStop, &me, now);
        }
        self.presence.heartbeat(topic_id, &me, now, None);

        let message = self.local_event(
            topic_id,
            ActivityKind::Message,
            now,
            Some(json!({ "content": content })),
        );
        self.emit_local(&message);
        let effects = vec![self.publish(message)];

        self.refresh_view(topic_id);
        effects
    }

    /// Toggle the local user's reaction on `message_id`
    pub fn react(&mut self, topic_id: &TopicId, message_id: &str, emoji: &str, now: i64) -> Vec<Effect> {
        let me = self.local_user.id.clone();
        let payload = ReactionPayload {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        };

        let change = self.topic_mut(topic_id).reactions.toggle(message_id, &me, emoji);
        tracing::debug!(topic_id = %topic_id, message_id, ?change, "Local reaction");

        let event = self.local_event(topic_id, ActivityKind::Reaction, now, serde_json::to_value(payload).ok());
        self.emit_local(&event);
        let effects = vec![self.publish(event)];

        self.refresh_view(topic_id);
        effects
    }

    // ---- timers ----

    /// Typing expiry, reorder windows and idle-topic collection
    pub fn tick(&mut self, now: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        let me = self.local_user.id.clone();
        let mut touched: HashSet<TopicId> = HashSet::new();

        for expired in self.typing.expire(now) {
            tracing::debug!(topic_id = %expired.topic_id, user_id = %expired.user_id, "Typing expired");
            if expired.user_id == me {
                self.debouncer.reset(&expired.topic_id);
                let event = self.local_event(&expired.topic_id, ActivityKind::TypingStop, now, None);
                self.emit_local(&event);
                effects.push(self.publish(event));
            } else {
                self.emit_synthetic(&expired.topic_id, ActivityKind::TypingStop, &expired.user_id, now);
            }
            touched.insert(expired.topic_id);
        }

        let timed_out: Vec<(TopicId, u64)> = self
            .topics
            .iter_mut()
            .filter_map(|(topic_id, state)| {
                state
                    .sequencer
                    .poll_timeout(now)
                    .map(|since| (topic_id.clone(), since))
            })
            .collect();
        for (topic_id, since) in timed_out {
            self.begin_resync(&topic_id, since, &mut effects);
            touched.insert(topic_id);
        }

        for topic_id in touched {
            self.refresh_view(&topic_id);
        }

        self.collect_idle_topics(now);
        effects
    }

    /// Evict silent presence entries, one synthetic `leave` each
    pub fn sweep(&mut self, now: i64) {
        let evicted = self.presence.sweep(now);
        let mut touched: HashSet<TopicId> = HashSet::new();

        for entry in evicted {
            let topic_id = entry.topic_id.clone();
            let user_id = entry.user_id().clone();
            tracing::debug!(topic_id = %topic_id, user_id = %user_id, "Evicting stale presence");

            if self.typing.stop(&topic_id, &user_id) {
                self.emit_synthetic(&topic_id, ActivityKind::TypingStop, &user_id, now);
            }
            self.emit_synthetic(&topic_id, ActivityKind::Leave, &user_id, now);
            touched.insert(topic_id);
        }

        for topic_id in touched {
            self.refresh_view(&topic_id);
        }
    }

    fn collect_idle_topics(&mut self, now: i64) {
        let grace = i64::try_from(self.config.fanout.topic_grace_ms).unwrap_or(i64::MAX);
        let mut expired = Vec::new();

        for (topic_id, state) in &mut self.topics {
            if self.hub.subscriber_count(topic_id) > 0 {
                state.idle_since = None;
                continue;
            }
            let idle_since = *state.idle_since.get_or_insert(now);
            if now - idle_since >= grace {
                expired.push(topic_id.clone());
            }
        }

        for topic_id in expired {
            tracing::debug!(topic_id = %topic_id, "Discarding idle topic state");
            self.topics.remove(&topic_id);
            self.presence.forget_topic(&topic_id);
            self.typing.forget_topic(&topic_id);
            self.debouncer.reset(&topic_id);
        }
    }

    // ---- helpers ----

    fn topic_mut(&mut self, topic_id: &TopicId) -> &mut TopicState {
        let fanout = &self.config.fanout;
        self.topics.entry(topic_id.clone()).or_insert_with(|| {
            let (view, _) = watch::channel(TopicView::empty(topic_id.clone()));
            TopicState {
                sequencer: TopicSequencer::new(fanout),
                reactions: ReactionBoard::new(),
                outbound_seq: 0,
                local_mounts: 0,
                announced_at: None,
                idle_since: None,
                last_error: None,
                view,
            }
        })
    }

    fn delivered_seq(&self, topic_id: &TopicId) -> u64 {
        self.topics
            .get(topic_id)
            .and_then(|state| state.sequencer.cursor())
            .unwrap_or(0)
    }

    fn user_payload(&self) -> serde_json::Value {
        let mut payload = json!({ "displayName": self.local_user.display_name });
        if let Some(avatar) = &self.local_user.avatar_ref {
            payload["avatarRef"] = json!(avatar);
        }
        payload
    }

    /// Publish a `join` for the local user and make sure they are present locally
    fn announce(&mut self, topic_id: &TopicId, now: i64) -> Effect {
        let payload = self.user_payload();
        let event = self.local_event(topic_id, ActivityKind::Join, now, Some(payload));
        if self.presence.join(topic_id, self.local_user.clone(), now, None) {
            self.emit_local(&event);
        }
        self.topic_mut(topic_id).announced_at = Some(now);
        self.publish(event)
    }

    /// Build an outbound event from the local user, stamped with the next outbound seq
    fn local_event(
        &mut self,
        topic_id: &TopicId,
        kind: ActivityKind,
        now: i64,
        payload: Option<serde_json::Value>,
    ) -> ActivityEvent {
        let user_id = self.local_user.id.clone();
        let state = self.topic_mut(topic_id);
        state.outbound_seq += 1;
        let mut event = ActivityEvent::new(topic_id.clone(), kind, user_id, now).with_seq(state.outbound_seq);
        event.payload = payload;
        event
    }

    fn publish(&mut self, event: ActivityEvent) -> Effect {
        if self.published_set.insert(event.id) {
            self.published.push_back(event.id);
            while self.published.len() > self.config.fanout.resync_buffer_size.max(1) {
                if let Some(old) = self.published.pop_front() {
                    self.published_set.remove(&old);
                }
            }
        }
        Effect::Publish {
            topic_id: event.topic_id.clone(),
            event,
        }
    }

    /// Dispatch a local event at the topic's current position in the stream
    fn emit_local(&self, event: &ActivityEvent) {
        let mut dispatched = event.clone();
        dispatched.seq = self.delivered_seq(&event.topic_id);
        self.emit(dispatched);
    }

    /// Dispatch an event nobody sent (expiry, eviction, implicit stop)
    fn emit_synthetic(&self, topic_id: &TopicId, kind: ActivityKind, user_id: &UserId, timestamp: i64) {
        let event = ActivityEvent::new(topic_id.clone(), kind, user_id.clone(), timestamp)
            .with_seq(self.delivered_seq(topic_id));
        self.emit(event);
    }

    fn emit(&self, event: ActivityEvent) {
        let topic_id = event.topic_id.clone();
        tracing::trace!(topic_id = %topic_id, kind = %event.kind, seq = event.seq, "Dispatching event");
        self.hub.dispatch(&topic_id, &TopicUpdate::Event(event));
    }

    fn refresh_view(&self, topic_id: &TopicId) {
        let Some(state) = self.topics.get(topic_id) else {
            return;
        };

        let me = &self.local_user.id;
        let reactions: BTreeMap<String, Vec<_>> = state
            .reactions
            .message_ids()
            .map(|message_id| (message_id.to_string(), state.reactions.counts(message_id, Some(me))))
            .filter(|(_, counts)| !counts.is_empty())
            .collect();

        let view = TopicView {
            topic_id: topic_id.clone(),
            presence: self.presence.snapshot(topic_id),
            typing_users: self.typing.typing_users(topic_id),
            reactions,
            resyncing: state.sequencer.is_resyncing(),
            last_seq: state.sequencer.cursor(),
            last_error: state.last_error.clone(),
        };

        state.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
