//! Application-root client
//!
//! [`RealtimeClient`] wires one [`Transport`], one engine and a history client
//! together. UI code asks it for a [`TopicHandle`] per open topic and never
//! touches the lower layers.

use crate::history::HttpHistoryClient;
use crate::topic::TopicHandle;
use parking_lot::Mutex;
use presence_common::{AppConfig, AppError, AppResult, ErrorReport};
use presence_core::{ActivityEvent, DomainError, HistoryApi, SharedClock, SystemClock, TopicId, UserRef};
use presence_engine::{EngineBuilder, EngineConfig, EngineHandle, EventSink};
use presence_transport::{Connector, Diagnostic, Transport, TransportError, TransportState};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared `lastError` signal
#[derive(Clone)]
pub(crate) struct ErrorSignal {
    tx: Arc<watch::Sender<Option<ErrorReport>>>,
    clock: SharedClock,
}

impl ErrorSignal {
    fn new(clock: SharedClock) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            clock,
        }
    }

    pub(crate) fn report(&self, err: &AppError) {
        let report = ErrorReport::new(err, self.clock.now_ms());
        tracing::debug!(code = %report.code, message = %report.message, "Recording client error");
        self.tx.send_replace(Some(report));
    }

    pub(crate) fn current(&self) -> Option<ErrorReport> {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<ErrorReport>> {
        self.tx.subscribe()
    }
}

/// Publishes through the transport and records failures on the error signal
struct ReportingSink {
    transport: Transport,
    errors: ErrorSignal,
}

impl EventSink for ReportingSink {
    fn publish(&self, topic_id: &TopicId, event: ActivityEvent) -> Result<(), TransportError> {
        self.transport.send(topic_id, event).inspect_err(|e| {
            self.errors.report(&AppError::from(e.clone()));
        })
    }
}

struct ClientInner {
    transport: Transport,
    engine: EngineHandle,
    engine_task: Mutex<Option<JoinHandle<()>>>,
    resume_task: JoinHandle<()>,
    errors: ErrorSignal,
    heartbeat_interval: Duration,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.resume_task.abort();
    }
}

/// Entry point for UI code
///
/// Cheap to clone. Construct one per application (or per signed-in user) and
/// pass it down explicitly.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    pub fn builder<C: Connector>(local_user: UserRef, connector: C) -> RealtimeClientBuilder<C> {
        RealtimeClientBuilder::new(local_user, connector)
    }

    pub fn local_user(&self) -> &UserRef {
        self.inner.engine.local_user()
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    pub fn transport_state(&self) -> TransportState {
        self.inner.transport.state()
    }

    /// Connect the transport; idempotent
    ///
    /// A transient failure is returned but the transport keeps retrying in
    /// the background. The error is also recorded as `last_error`.
    pub async fn connect(&self) -> AppResult<()> {
        self.inner.transport.connect().await.map_err(|e| {
            let err = AppError::from(e);
            self.inner.errors.report(&err);
            err
        })
    }

    pub async fn disconnect(&self) {
        self.inner.transport.disconnect().await;
    }

    /// Open `topic_id`: subscribe, announce presence, start heartbeating
    pub async fn use_topic(&self, topic_id: impl Into<TopicId>) -> AppResult<TopicHandle> {
        let topic_id = topic_id.into();
        if topic_id.is_empty() {
            return Err(DomainError::EmptyTopicId.into());
        }

        let feed = self.inner.engine.open_topic(topic_id.clone()).await?;

        let engine = self.inner.engine.clone();
        let subscription = self.inner.transport.subscribe(topic_id.clone(), move |event| {
            if engine.ingest(event.clone()).is_err() {
                tracing::trace!("Engine stopped, dropping inbound event");
            }
        });

        self.inner.engine.join(&topic_id)?;
        let heartbeat = spawn_heartbeat(self.inner.engine.clone(), topic_id.clone(), self.inner.heartbeat_interval);

        tracing::info!(topic_id = %topic_id, "Topic opened");

        Ok(TopicHandle::new(
            topic_id,
            self.inner.engine.clone(),
            feed,
            subscription,
            heartbeat,
            self.inner.errors.clone(),
        ))
    }

    /// Most recent client-level error (connection, auth, publish)
    pub fn last_error(&self) -> Option<ErrorReport> {
        self.inner.errors.current()
    }

    pub fn watch_last_error(&self) -> watch::Receiver<Option<ErrorReport>> {
        self.inner.errors.subscribe()
    }

    /// Stop the engine and close the connection
    pub async fn shutdown(&self) {
        self.inner.resume_task.abort();
        self.inner.engine.shutdown();
        let task = self.inner.engine_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Engine task ended abnormally");
            }
        }
        self.inner.transport.disconnect().await;
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("engine", &self.inner.engine)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

fn spawn_heartbeat(engine: EngineHandle, topic_id: TopicId, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if engine.heartbeat(&topic_id).is_err() {
                break;
            }
        }
    })
}

/// Tell the engine to catch up each time the link comes back after a drop
fn spawn_resume_watcher(transport: &Transport, engine: EngineHandle) -> JoinHandle<()> {
    let mut state = transport.watch_state();
    tokio::spawn(async move {
        let mut was_connected = state.borrow_and_update().is_connected();
        let mut ever_connected = was_connected;

        while state.changed().await.is_ok() {
            let connected = state.borrow_and_update().is_connected();
            if connected && !was_connected && ever_connected {
                tracing::info!("Transport reconnected, resuming topics");
                if engine.resume().is_err() {
                    break;
                }
            }
            ever_connected |= connected;
            was_connected = connected;
        }
    })
}

/// Builder for [`RealtimeClient`]
pub struct RealtimeClientBuilder<C> {
    local_user: UserRef,
    connector: C,
    config: AppConfig,
    history: Option<Arc<dyn HistoryApi>>,
    clock: SharedClock,
}

impl<C: Connector> RealtimeClientBuilder<C> {
    #[must_use]
    pub fn new(local_user: UserRef, connector: C) -> Self {
        Self {
            local_user,
            connector,
            config: AppConfig::default(),
            history: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the history API (defaults to HTTP at `history.base_url`)
    #[must_use]
    pub fn history(mut self, history: Arc<dyn HistoryApi>) -> Self {
        self.history = Some(history);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the client and start its engine; must run inside a tokio runtime
    pub fn build(self) -> AppResult<RealtimeClient> {
        let history = match self.history {
            Some(history) => history,
            None => Arc::new(HttpHistoryClient::from_config(&self.config.history)?),
        };

        let errors = ErrorSignal::new(self.clock.clone());

        let fatal_errors = errors.clone();
        let diagnostic_errors = errors.clone();
        let transport = Transport::builder(self.connector)
            .config(self.config.transport.clone())
            .on_fatal_error(move |err| {
                tracing::error!(error = %err, "Transport failed permanently");
                fatal_errors.report(&AppError::from(err.clone()));
            })
            .on_diagnostic(move |diagnostic| report_diagnostic(&diagnostic_errors, diagnostic))
            .build();

        let sink = Arc::new(ReportingSink {
            transport: transport.clone(),
            errors: errors.clone(),
        });
        let (engine, engine_task) = EngineBuilder::new(self.local_user, sink, history)
            .config(EngineConfig::from(&self.config))
            .clock(self.clock)
            .spawn();
        let resume_task = spawn_resume_watcher(&transport, engine.clone());

        Ok(RealtimeClient {
            inner: Arc::new(ClientInner {
                transport,
                engine,
                engine_task: Mutex::new(Some(engine_task)),
                resume_task,
                errors,
                heartbeat_interval: Duration::from_millis(self.config.presence.heartbeat_interval_ms.max(1)),
            }),
        })
    }
}

fn report_diagnostic(errors: &ErrorSignal, diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::MalformedFrame { reason } => {
            tracing::debug!(%reason, "Malformed frame dropped");
            errors.report(&DomainError::MalformedMessage(reason.clone()).into());
        }
        Diagnostic::ServerError { code, reason } => {
            errors.report(&AppError::connection(format!("server error {code}: {reason}")));
        }
        Diagnostic::ConnectionLost { error, .. } => errors.report(&AppError::from(error.clone())),
    }
}
