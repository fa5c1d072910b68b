//! Reconnecting transport
//!
//! One supervisor task owns the link: it dials through the [`Connector`],
//! resubscribes every topic with a live handler, pumps inbound frames to
//! handlers, sends keepalive pings, and on loss sleeps with exponential
//! backoff before dialing again. Fatal (protocol/auth) failures stop the
//! loop and are reported through `on_fatal_error`.

use crate::connection::{Backoff, Connector, Link, LinkEvent};
use crate::error::{TransportError, TransportResult};
use crate::protocol::{is_fatal_close, ClientFrame, ServerFrame};
use dashmap::DashMap;
use parking_lot::Mutex;
use presence_common::TransportConfig;
use presence_core::{ActivityEvent, TopicId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Callback for inbound events on a topic
pub type EventHandler = Arc<dyn Fn(&ActivityEvent) + Send + Sync>;

/// Callback for errors that stop reconnection
pub type FatalErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Callback for non-fatal problems worth surfacing
pub type DiagnosticHandler = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `retry_in_ms` before attempt number `attempt`
    Reconnecting { attempt: u32, retry_in_ms: u64 },
    /// Stopped on a protocol/auth error; `connect()` must be called again
    Failed(TransportError),
}

impl TransportState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting {
                attempt,
                retry_in_ms,
            } => write!(f, "reconnecting (attempt {attempt} in {retry_in_ms}ms)"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Non-fatal problems reported to the diagnostics callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Inbound text that is neither a control frame nor a valid event
    MalformedFrame { reason: String },
    /// `op: error` frame with a non-fatal code
    ServerError { code: u16, reason: String },
    /// Link lost; the next attempt is scheduled
    ConnectionLost { error: TransportError, retry_in_ms: u64 },
}

enum SessionEnd {
    Shutdown,
    Error(TransportError),
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    state_tx: watch::Sender<TransportState>,
    handlers: DashMap<TopicId, Vec<(u64, EventHandler)>>,
    next_handler_id: AtomicU64,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    last_error: Mutex<Option<TransportError>>,
    supervisor: Mutex<Option<Supervisor>>,
    on_fatal_error: Option<FatalErrorHandler>,
    on_diagnostic: Option<DiagnosticHandler>,
}

/// Handle to the single logical connection
///
/// Cheap to clone; all clones share the same link and handler registry.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &*self.inner.state_tx.borrow())
            .field("topics", &self.inner.handlers.len())
            .finish()
    }
}

impl Transport {
    pub fn new(connector: impl Connector, config: TransportConfig) -> Self {
        TransportBuilder::new(connector).config(config).build()
    }

    pub fn builder(connector: impl Connector) -> TransportBuilder {
        TransportBuilder::new(connector)
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransportState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.inner.state_tx.subscribe()
    }

    /// Topics with at least one live handler
    pub fn active_topics(&self) -> Vec<TopicId> {
        self.inner.active_topics()
    }

    /// Open the connection
    ///
    /// Idempotent: returns immediately when connected, and concurrent callers
    /// during a pending attempt share it. Resolves with the outcome of the
    /// next attempt; after a transient failure the supervisor keeps retrying
    /// in the background.
    pub async fn connect(&self) -> TransportResult<()> {
        let mut state_rx = self.inner.state_tx.subscribe();
        if state_rx.borrow_and_update().is_connected() {
            return Ok(());
        }

        {
            let mut supervisor = self.inner.supervisor.lock();
            // A supervisor that already reported a terminal state is unwinding
            // and will not connect again.
            let terminal = matches!(
                *self.inner.state_tx.borrow(),
                TransportState::Failed(_) | TransportState::Disconnected
            );
            let running = !terminal
                && supervisor
                    .as_ref()
                    .is_some_and(|s| !s.task.is_finished());

            if !running {
                tracing::info!("Connecting transport");
                self.inner.set_state(TransportState::Connecting);
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let task = tokio::spawn(run_supervisor(self.inner.clone(), shutdown_rx));
                *supervisor = Some(Supervisor {
                    shutdown: shutdown_tx,
                    task,
                });
            }
        }

        loop {
            if state_rx.changed().await.is_err() {
                return Err(TransportError::Shutdown);
            }

            let state = state_rx.borrow_and_update().clone();
            match state {
                TransportState::Connected => return Ok(()),
                TransportState::Connecting => {}
                TransportState::Disconnected => return Err(TransportError::Shutdown),
                TransportState::Failed(err) => return Err(err),
                TransportState::Reconnecting { .. } => {
                    let err = self
                        .inner
                        .last_error
                        .lock()
                        .clone()
                        .unwrap_or_else(|| TransportError::Connect("connection lost".to_string()));
                    return Err(err);
                }
            }
        }
    }

    /// Close the connection and cancel any pending reconnect
    pub async fn disconnect(&self) {
        let supervisor = self.inner.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.shutdown.send(true);
            if let Err(e) = supervisor.task.await {
                tracing::warn!(error = %e, "Transport supervisor ended abnormally");
            }
        }

        self.inner.outgoing.lock().take();
        self.inner.set_state(TransportState::Disconnected);
        tracing::info!("Transport disconnected");
    }

    /// Publish an event on `topic_id`
    ///
    /// Fire-and-forget: fails with [`TransportError::NotConnected`] when no
    /// link is up; nothing is queued for later.
    pub fn send(&self, topic_id: &TopicId, mut event: ActivityEvent) -> TransportResult<()> {
        if event.topic_id != *topic_id {
            event.topic_id = topic_id.clone();
        }
        self.inner.send_frame(&ClientFrame::Publish { event })
    }

    /// Register `handler` for events on `topic_id`
    ///
    /// The first handler for a topic subscribes on the wire. The returned
    /// [`Subscription`] removes the handler when dropped.
    pub fn subscribe<F>(&self, topic_id: TopicId, handler: F) -> Subscription
    where
        F: Fn(&ActivityEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);

        let first = {
            let mut entry = self.inner.handlers.entry(topic_id.clone()).or_default();
            entry.push((id, Arc::new(handler)));
            entry.len() == 1
        };

        if first {
            tracing::debug!(topic_id = %topic_id, "Subscribing to topic");
            let frame = ClientFrame::Subscribe {
                topic_id: topic_id.clone(),
            };
            // Offline subscriptions are sent on the next connect.
            if let Err(e) = self.inner.send_frame(&frame) {
                tracing::trace!(topic_id = %topic_id, error = %e, "Deferred subscribe");
            }
        }

        Subscription {
            inner: Arc::downgrade(&self.inner),
            topic_id,
            id,
            active: true,
        }
    }
}

impl Inner {
    fn set_state(&self, state: TransportState) {
        let previous = self.state_tx.send_replace(state.clone());
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Transport state changed");
        }
    }

    fn active_topics(&self) -> Vec<TopicId> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn send_frame(&self, frame: &ClientFrame) -> TransportResult<()> {
        let text = frame.to_json()?;
        let outgoing = self.outgoing.lock();
        match outgoing.as_ref() {
            Some(tx) => tx.send(text).map_err(|_| TransportError::NotConnected),
            None => Err(TransportError::NotConnected),
        }
    }

    fn remove_handler(&self, topic_id: &TopicId, id: u64) {
        let now_empty = self
            .handlers
            .get_mut(topic_id)
            .map(|mut handlers| {
                handlers.retain(|(handler_id, _)| *handler_id != id);
                handlers.is_empty()
            })
            .unwrap_or(false);

        if now_empty && self.handlers.remove_if(topic_id, |_, h| h.is_empty()).is_some() {
            tracing::debug!(topic_id = %topic_id, "Unsubscribing from topic");
            let frame = ClientFrame::Unsubscribe {
                topic_id: topic_id.clone(),
            };
            if let Err(e) = self.send_frame(&frame) {
                tracing::trace!(topic_id = %topic_id, error = %e, "Unsubscribe not sent");
            }
        }
    }

    fn dispatch(&self, event: &ActivityEvent) {
        // Clone out of the map so handlers may subscribe/unsubscribe.
        let handlers: Vec<EventHandler> = self
            .handlers
            .get(&event.topic_id)
            .map(|entry| entry.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(topic_id = %event.topic_id, "Event for topic without handlers");
        }
        for handler in handlers {
            handler(event);
        }
    }

    fn diagnose(&self, diagnostic: Diagnostic) {
        if let Some(handler) = &self.on_diagnostic {
            handler(&diagnostic);
        }
    }

    fn handle_text(&self, text: &str) -> Option<SessionEnd> {
        match ServerFrame::parse(text) {
            Ok(ServerFrame::Event(event)) => {
                self.dispatch(&event);
                None
            }
            Ok(ServerFrame::Pong) => {
                tracing::trace!("Pong received");
                None
            }
            Ok(ServerFrame::Error { code, reason }) if is_fatal_close(code) => {
                Some(SessionEnd::Error(TransportError::Closed {
                    code: Some(code),
                    reason,
                }))
            }
            Ok(ServerFrame::Error { code, reason }) => {
                tracing::warn!(code, reason = %reason, "Server reported an error");
                self.diagnose(Diagnostic::ServerError { code, reason });
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed inbound frame");
                self.diagnose(Diagnostic::MalformedFrame {
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}

async fn run_supervisor(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::from_config(&inner.config);

    loop {
        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            result = inner.connector.connect() => result,
        };

        let end = match attempt {
            Ok(link) => {
                backoff.reset();
                run_session(&inner, link, &mut shutdown).await
            }
            Err(e) => SessionEnd::Error(e),
        };

        let err = match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Error(err) => err,
        };

        if err.is_fatal() {
            tracing::error!(error = %err, "Fatal transport error, not reconnecting");
            *inner.last_error.lock() = Some(err.clone());
            inner.outgoing.lock().take();
            inner.set_state(TransportState::Failed(err.clone()));
            if let Some(handler) = &inner.on_fatal_error {
                handler(&err);
            }
            return;
        }

        let delay = backoff.next_delay();
        let retry_in_ms = delay.as_millis() as u64;
        tracing::warn!(
            error = %err,
            attempt = backoff.attempt(),
            retry_in_ms,
            "Connection lost, scheduling reconnect"
        );
        *inner.last_error.lock() = Some(err.clone());
        inner.set_state(TransportState::Reconnecting {
            attempt: backoff.attempt(),
            retry_in_ms,
        });
        inner.diagnose(Diagnostic::ConnectionLost {
            error: err,
            retry_in_ms,
        });

        tokio::select! {
            _ = shutdown.changed() => break,
            () = sleep(delay) => {}
        }
    }

    inner.outgoing.lock().take();
    inner.set_state(TransportState::Disconnected);
}

async fn run_session(
    inner: &Arc<Inner>,
    link: Link,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let Link {
        outgoing,
        mut incoming,
    } = link;

    {
        let mut slot = inner.outgoing.lock();
        for topic_id in inner.active_topics() {
            let frame = ClientFrame::Subscribe { topic_id };
            if let Ok(text) = frame.to_json() {
                let _ = outgoing.send(text);
            }
        }
        *slot = Some(outgoing);
    }

    inner.last_error.lock().take();
    inner.set_state(TransportState::Connected);
    tracing::info!(topics = inner.handlers.len(), "Transport connected");

    let period = Duration::from_millis(inner.config.keepalive_interval_ms);
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            _ = shutdown.changed() => break SessionEnd::Shutdown,
            _ = keepalive.tick() => {
                if let Err(e) = inner.send_frame(&ClientFrame::Ping) {
                    tracing::debug!(error = %e, "Keepalive ping failed");
                }
            }
            event = incoming.recv() => match event {
                Some(LinkEvent::Text(text)) => {
                    if let Some(end) = inner.handle_text(&text) {
                        break end;
                    }
                }
                Some(LinkEvent::Closed { code, reason }) => {
                    break SessionEnd::Error(TransportError::Closed { code, reason });
                }
                None => {
                    break SessionEnd::Error(TransportError::Closed {
                        code: None,
                        reason: "link dropped".to_string(),
                    });
                }
            }
        }
    };

    inner.outgoing.lock().take();
    end
}

/// Handle for one registered event handler
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes the
/// handler; removing the last handler of a topic unsubscribes on the wire.
pub struct Subscription {
    inner: Weak<Inner>,
    topic_id: TopicId,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn topic_id(&self) -> &TopicId {
        &self.topic_id
    }

    /// Remove the handler now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_handler(&self.topic_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic_id", &self.topic_id)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

/// Builder for [`Transport`]
pub struct TransportBuilder {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    on_fatal_error: Option<FatalErrorHandler>,
    on_diagnostic: Option<DiagnosticHandler>,
}

impl TransportBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new(connector: impl Connector) -> Self {
        Self {
            connector: Arc::new(connector),
            config: TransportConfig::default(),
            on_fatal_error: None,
            on_diagnostic: None,
        }
    }

    /// Set reconnect/keepalive settings
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Called once when the transport stops on a protocol/auth error
    #[must_use]
    pub fn on_fatal_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_fatal_error = Some(Arc::new(handler));
        self
    }

    /// Called for malformed frames, server errors and lost links
    #[must_use]
    pub fn on_diagnostic<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.on_diagnostic = Some(Arc::new(handler));
        self
    }

    /// Build the transport (does not connect)
    pub fn build(self) -> Transport {
        let (state_tx, _) = watch::channel(TransportState::Disconnected);
        Transport {
            inner: Arc::new(Inner {
                connector: self.connector,
                config: self.config,
                state_tx,
                handlers: DashMap::new(),
                next_handler_id: AtomicU64::new(1),
                outgoing: Mutex::new(None),
                last_error: Mutex::new(None),
                supervisor: Mutex::new(None),
                on_fatal_error: self.on_fatal_error,
                on_diagnostic: self.on_diagnostic,
            }),
        }
    }
}
