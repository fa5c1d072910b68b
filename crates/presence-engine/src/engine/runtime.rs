//! Engine task
//!
//! [`Engine`] owns an [`EngineState`] on a single tokio task. Everything else
//! talks to it through a cloneable [`EngineHandle`]: commands go over an
//! unbounded channel, so calls from transport callbacks and UI code never
//! block. Typing expiry and reorder windows are checked on a short tick,
//! presence eviction on the sweep interval.

use super::config::EngineConfig;
use super::sink::EventSink;
use super::state::{Effect, EngineState};
use super::view::TopicView;
use crate::fanout::{FanoutHub, FanoutSubscription};
use presence_core::{
    ActivityEvent, DomainError, HistoryApi, HistoryError, SharedClock, SystemClock, TopicId, UserRef,
};
use presence_transport::Subscription;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

enum Command {
    Open {
        topic_id: TopicId,
        baseline: Option<u64>,
        reply: oneshot::Sender<TopicFeed>,
    },
    View {
        topic_id: TopicId,
        reply: oneshot::Sender<Option<TopicView>>,
    },
    Ingest(ActivityEvent),
    Join(TopicId),
    Leave {
        topic_id: TopicId,
        /// Released after the `leave` has been published
        release: Option<Subscription>,
    },
    Heartbeat(TopicId),
    StartTyping(TopicId),
    StopTyping(TopicId),
    SendMessage {
        topic_id: TopicId,
        content: String,
    },
    React {
        topic_id: TopicId,
        message_id: String,
        emoji: String,
    },
    ResyncFinished {
        topic_id: TopicId,
        result: Result<Vec<ActivityEvent>, HistoryError>,
    },
    Resume,
    Shutdown,
}

/// A topic's event stream plus its reactive view
#[derive(Debug)]
pub struct TopicFeed {
    pub updates: FanoutSubscription,
    pub view: watch::Receiver<TopicView>,
}

/// The engine task
pub struct Engine {
    state: EngineState,
    clock: SharedClock,
    sink: Arc<dyn EventSink>,
    history: Arc<dyn HistoryApi>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Lets history fetches report back without keeping the engine alive
    loopback: mpsc::WeakUnboundedSender<Command>,
    tick_interval: Duration,
    sweep_interval: Duration,
}

impl Engine {
    pub fn builder(local_user: UserRef, sink: Arc<dyn EventSink>, history: Arc<dyn HistoryApi>) -> EngineBuilder {
        EngineBuilder::new(local_user, sink, history)
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        tracing::info!(user_id = %self.state.local_user().id, "Engine started");

        let mut tick = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = tick.tick() => {
                    let effects = self.state.tick(self.clock.now_ms());
                    self.execute(effects);
                }
                _ = sweep.tick() => self.state.sweep(self.clock.now_ms()),
            }
        }

        tracing::info!("Engine stopped");
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now_ms();

        let effects = match command {
            Command::Open {
                topic_id,
                baseline,
                reply,
            } => {
                let (updates, view) = self.state.open_topic_at(&topic_id, baseline);
                // A caller that gave up just drops the feed.
                let _ = reply.send(TopicFeed { updates, view });
                Vec::new()
            }
            Command::View { topic_id, reply } => {
                let _ = reply.send(self.state.view(&topic_id));
                Vec::new()
            }
            Command::Ingest(event) => self.state.ingest(event, now),
            Command::Join(topic_id) => self.state.join(&topic_id, now),
            Command::Leave { topic_id, release } => {
                let effects = self.state.leave(&topic_id, now);
                self.execute(effects);
                drop(release);
                Vec::new()
            }
            Command::Heartbeat(topic_id) => self.state.heartbeat(&topic_id, now),
            Command::StartTyping(topic_id) => self.state.start_typing(&topic_id, now),
            Command::StopTyping(topic_id) => self.state.stop_typing(&topic_id, now),
            Command::SendMessage { topic_id, content } => self.state.send_message(&topic_id, &content, now),
            Command::React {
                topic_id,
                message_id,
                emoji,
            } => self.state.react(&topic_id, &message_id, &emoji, now),
            Command::ResyncFinished { topic_id, result } => {
                self.state.complete_resync(&topic_id, result, now);
                Vec::new()
            }
            Command::Resume => {
                tracing::info!("Link restored, catching up open topics");
                self.state.resume(now)
            }
            Command::Shutdown => Vec::new(),
        };

        self.execute(effects);
    }

    fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish { topic_id, event } => {
                    let kind = event.kind;
                    if let Err(e) = self.sink.publish(&topic_id, event) {
                        tracing::debug!(topic_id = %topic_id, %kind, error = %e, "Publish failed, dropping event");
                    }
                }
                Effect::FetchHistory { topic_id, since } => self.fetch_history(topic_id, since),
            }
        }
    }

    fn fetch_history(&self, topic_id: TopicId, since: u64) {
        let history = self.history.clone();
        let loopback = self.loopback.clone();

        tokio::spawn(async move {
            let result = history.events_since(&topic_id, since).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::ResyncFinished { topic_id, result });
            }
        });
    }
}

/// Cloneable handle to a running [`Engine`]
///
/// Every method fails with [`DomainError::EngineStopped`] once the engine
/// task has exited.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    local_user: UserRef,
}

impl EngineHandle {
    pub fn local_user(&self) -> &UserRef {
        &self.local_user
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Subscribe to `topic_id`'s events and view
    pub async fn open_topic(&self, topic_id: TopicId) -> Result<TopicFeed, DomainError> {
        self.open_topic_at(topic_id, None).await
    }

    /// Like [`Self::open_topic`], resuming after `baseline` when given
    ///
    /// Events at or below the baseline are treated as already delivered.
    pub async fn open_topic_at(&self, topic_id: TopicId, baseline: Option<u64>) -> Result<TopicFeed, DomainError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open {
            topic_id,
            baseline,
            reply,
        })?;
        rx.await.map_err(|_| DomainError::EngineStopped)
    }

    /// Snapshot of `topic_id`, after every previously sent command has applied
    pub async fn view(&self, topic_id: TopicId) -> Result<Option<TopicView>, DomainError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::View { topic_id, reply })?;
        rx.await.map_err(|_| DomainError::EngineStopped)
    }

    /// Hand an inbound event to the engine
    pub fn ingest(&self, event: ActivityEvent) -> Result<(), DomainError> {
        self.send(Command::Ingest(event))
    }

    pub fn join(&self, topic_id: &TopicId) -> Result<(), DomainError> {
        self.send(Command::Join(topic_id.clone()))
    }

    pub fn leave(&self, topic_id: &TopicId) -> Result<(), DomainError> {
        self.send(Command::Leave {
            topic_id: topic_id.clone(),
            release: None,
        })
    }

    /// Leave, then drop `subscription` once the `leave` is on the wire
    pub fn leave_and_release(&self, topic_id: &TopicId, subscription: Subscription) -> Result<(), DomainError> {
        self.send(Command::Leave {
            topic_id: topic_id.clone(),
            release: Some(subscription),
        })
    }

    pub fn heartbeat(&self, topic_id: &TopicId) -> Result<(), DomainError> {
        self.send(Command::Heartbeat(topic_id.clone()))
    }

    pub fn start_typing(&self, topic_id: &TopicId) -> Result<(), DomainError> {
        self.send(Command::StartTyping(topic_id.clone()))
    }

    pub fn stop_typing(&self, topic_id: &TopicId) -> Result<(), DomainError> {
        self.send(Command::StopTyping(topic_id.clone()))
    }

    pub fn send_message(&self, topic_id: &TopicId, content: impl Into<String>) -> Result<(), DomainError> {
        self.send(Command::SendMessage {
            topic_id: topic_id.clone(),
            content: content.into(),
        })
    }

    pub fn react(
        &self,
        topic_id: &TopicId,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.send(Command::React {
            topic_id: topic_id.clone(),
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    /// The connection came back after a drop: replay missed history and re-announce
    pub fn resume(&self) -> Result<(), DomainError> {
        self.send(Command::Resume)
    }

    /// Stop the engine task; pending commands before this one still apply
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<(), DomainError> {
        self.commands.send(command).map_err(|_| DomainError::EngineStopped)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("user_id", &self.local_user.id)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    local_user: UserRef,
    sink: Arc<dyn EventSink>,
    history: Arc<dyn HistoryApi>,
    config: EngineConfig,
    clock: SharedClock,
    hub: Option<Arc<FanoutHub>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(local_user: UserRef, sink: Arc<dyn EventSink>, history: Arc<dyn HistoryApi>) -> Self {
        Self {
            local_user,
            sink,
            history,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            hub: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for every deadline
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Share a fanout hub with other components
    #[must_use]
    pub fn hub(mut self, hub: Arc<FanoutHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Build the engine without starting it
    pub fn build(self) -> (Engine, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = self.hub.unwrap_or_else(FanoutHub::new_shared);

        let tick_interval = Duration::from_millis(self.config.fanout.tick_interval_ms.max(1));
        let sweep_interval = Duration::from_millis(self.config.presence.sweep_interval_ms.max(1));

        let handle = EngineHandle {
            commands: tx.clone(),
            local_user: self.local_user.clone(),
        };
        let engine = Engine {
            state: EngineState::new(self.config, self.local_user, hub),
            clock: self.clock,
            sink: self.sink,
            history: self.history,
            commands: rx,
            loopback: tx.downgrade(),
            tick_interval,
            sweep_interval,
        };
        (engine, handle)
    }

    /// Build and spawn the engine on the current runtime
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (engine, handle) = self.build();
        let task = tokio::spawn(engine.run());
        (handle, task)
    }
}
