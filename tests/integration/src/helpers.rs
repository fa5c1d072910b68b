//! Test helpers for integration tests
//!
//! Provides an in-memory backend, a scripted history API, and utilities for
//! waiting on client state. Tests run on tokio's paused clock, and clients use
//! a `TokioClock`, so engine deadlines follow `tokio::time::sleep`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use presence_client::{RealtimeClient, TopicHandle};
use presence_common::AppConfig;
use presence_core::{ActivityEvent, HistoryApi, HistoryError, TopicId, UserId};
use presence_engine::{TokioClock, TopicUpdate, TopicView};
use presence_transport::{memory_pair, ClientFrame, MemoryServer, ServerLink};

use crate::fixtures::local_user;

/// How long a helper waits before declaring the test stuck
const WAIT: Duration = Duration::from_secs(30);

/// History API backed by a per-topic event log
#[derive(Debug, Default)]
pub struct FakeHistory {
    events: Mutex<HashMap<TopicId, Vec<ActivityEvent>>>,
    requests: Mutex<Vec<(TopicId, u64)>>,
    failing: AtomicBool,
}

impl FakeHistory {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `event` as stored by the backend
    pub fn record(&self, event: ActivityEvent) {
        self.events
            .lock()
            .entry(event.topic_id.clone())
            .or_default()
            .push(event);
    }

    /// Make every request fail with a 503
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(topic, since)` of every request so far
    pub fn requests(&self) -> Vec<(TopicId, u64)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HistoryApi for FakeHistory {
    async fn events_since(&self, topic_id: &TopicId, since: u64) -> Result<Vec<ActivityEvent>, HistoryError> {
        self.requests.lock().push((topic_id.clone(), since));
        if self.failing.load(Ordering::SeqCst) {
            return Err(HistoryError::Status(503));
        }

        let mut events: Vec<ActivityEvent> = self
            .events
            .lock()
            .get(topic_id)
            .map(|log| log.iter().filter(|e| e.seq > since).cloned().collect())
            .unwrap_or_default();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }
}

/// A connected client plus the server end of its link
pub struct TestClient {
    pub client: RealtimeClient,
    pub server: MemoryServer,
    pub link: ServerLink,
    pub history: Arc<FakeHistory>,
}

impl TestClient {
    /// Start a client with default settings and connect it
    pub async fn start() -> Result<Self> {
        Self::start_with_config(AppConfig::default()).await
    }

    /// Start a client with custom config and connect it
    pub async fn start_with_config(config: AppConfig) -> Result<Self> {
        let (connector, mut server) = memory_pair();
        let history = FakeHistory::new_shared();

        let client = RealtimeClient::builder(local_user(), connector)
            .config(config)
            .history(history.clone())
            .clock(Arc::new(TokioClock::new()))
            .build()?;

        client.connect().await?;
        let link = server.accept().await.context("server never saw a connection")?;

        Ok(Self {
            client,
            server,
            link,
            history,
        })
    }

    /// Close the current link with `code` and wait for the client to reconnect
    pub async fn drop_connection(self, code: Option<u16>) -> Result<Self> {
        let Self {
            client,
            mut server,
            link,
            history,
        } = self;
        link.close(code, "network");

        let link = tokio::time::timeout(WAIT, server.accept())
            .await
            .context("client did not reconnect")?
            .context("server closed")?;

        Ok(Self {
            client,
            server,
            link,
            history,
        })
    }

    /// Next non-ping frame the client sent
    pub async fn next_frame(&mut self) -> Result<ClientFrame> {
        tokio::time::timeout(WAIT, self.link.recv_frame())
            .await
            .context("no frame from client")?
            .ok_or_else(|| anyhow!("link closed"))
    }

    /// Next event the client published, skipping other frames
    pub async fn next_publish(&mut self) -> Result<ActivityEvent> {
        loop {
            if let ClientFrame::Publish { event } = self.next_frame().await? {
                return Ok(event);
            }
        }
    }

    /// Every event published and not yet read
    pub fn drain_publishes(&mut self) -> Vec<ActivityEvent> {
        let mut events = Vec::new();
        while let Some(frame) = self.link.try_recv_frame() {
            if let ClientFrame::Publish { event } = frame {
                events.push(event);
            }
        }
        events
    }

    /// Wait until the engine has handled everything sent to it so far
    ///
    /// On a paused clock the sleep only returns once every task is idle, so
    /// frames still queued on the link reach the engine first.
    pub async fn settle(&self, topic_id: &TopicId) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.client.engine().view(topic_id.clone()).await?;
        Ok(())
    }
}

/// Wait until `topic`'s view satisfies `pred`
pub async fn wait_for_view<F>(topic: &mut TopicHandle, pred: F) -> Result<TopicView>
where
    F: Fn(&TopicView) -> bool,
{
    let current = topic.view();
    if pred(&current) {
        return Ok(current);
    }

    tokio::time::timeout(WAIT, async {
        loop {
            let view = topic.changed().await?;
            if pred(&view) {
                return Ok::<_, anyhow::Error>(view);
            }
        }
    })
    .await
    .context("view never reached the expected state")?
}

/// Events queued on `topic` that came from someone other than `me`
pub fn drain_remote_events(topic: &mut TopicHandle, me: &UserId) -> Vec<ActivityEvent> {
    topic
        .updates()
        .drain()
        .into_iter()
        .filter_map(|update| match update {
            TopicUpdate::Event(event) if event.user_id != *me => Some(event),
            _ => None,
        })
        .collect()
}

/// Sequence numbers of `events`, in order
pub fn seqs(events: &[ActivityEvent]) -> Vec<u64> {
    events.iter().map(|e| e.seq).collect()
}
