//! In-process loopback connector
//!
//! `memory_pair()` returns a connector for the transport and the matching
//! server end. Each successful `connect()` hands the server a [`ServerLink`]
//! that speaks the same frames as the WebSocket backend, so the whole client
//! stack can run without a network.

use super::connector::{Connector, Link, LinkEvent};
use crate::error::{TransportError, TransportResult};
use crate::protocol::{ClientFrame, CloseCode, ServerFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use presence_core::ActivityEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Shared {
    refusals: Mutex<VecDeque<TransportError>>,
    attempts: AtomicUsize,
}

/// Client end of an in-process link
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
    accept_tx: mpsc::UnboundedSender<ServerLink>,
}

/// Server end: accepts links opened by the paired connector
#[derive(Debug)]
pub struct MemoryServer {
    shared: Arc<Shared>,
    accept_rx: mpsc::UnboundedReceiver<ServerLink>,
}

/// Create a connected connector/server pair
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let shared = Arc::new(Shared::default());
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            shared: shared.clone(),
            accept_tx,
        },
        MemoryServer { shared, accept_rx },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> TransportResult<Link> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.shared.refusals.lock().pop_front() {
            return Err(err);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let server_link = ServerLink {
            from_client: out_rx,
            to_client: in_tx,
        };
        self.accept_tx
            .send(server_link)
            .map_err(|_| TransportError::Connect("memory server is gone".to_string()))?;

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

impl MemoryServer {
    /// Wait for the next client link
    pub async fn accept(&mut self) -> Option<ServerLink> {
        self.accept_rx.recv().await
    }

    /// Fail the next `connect()` with `err` instead of opening a link
    pub fn refuse_next(&self, err: TransportError) {
        self.shared.refusals.lock().push_back(err);
    }

    /// Total `connect()` calls seen, including refused ones
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Server side of one open link
#[derive(Debug)]
pub struct ServerLink {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl ServerLink {
    /// Next frame from the client, skipping keepalive pings
    ///
    /// Returns `None` once the client has dropped the link.
    pub async fn recv_frame(&mut self) -> Option<ClientFrame> {
        while let Some(text) = self.from_client.recv().await {
            if let Some(frame) = Self::decode(&text) {
                return Some(frame);
            }
        }
        None
    }

    /// Non-blocking variant of [`Self::recv_frame`]
    pub fn try_recv_frame(&mut self) -> Option<ClientFrame> {
        while let Ok(text) = self.from_client.try_recv() {
            if let Some(frame) = Self::decode(&text) {
                return Some(frame);
            }
        }
        None
    }

    fn decode(text: &str) -> Option<ClientFrame> {
        match ClientFrame::from_json(text) {
            Ok(ClientFrame::Ping) => None,
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "memory server received undecodable frame");
                None
            }
        }
    }

    /// Push an activity event to the client
    pub fn send_event(&self, event: &ActivityEvent) -> bool {
        match event.to_json() {
            Ok(text) => self.send_raw(text),
            Err(_) => false,
        }
    }

    /// Push raw text (for malformed-input tests)
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(LinkEvent::Text(text.into())).is_ok()
    }

    /// Push an `op: error` control frame
    pub fn send_error(&self, code: CloseCode) -> bool {
        let frame = ServerFrame::Error {
            code: code.as_u16(),
            reason: code.description().to_string(),
        };
        match frame.to_json() {
            Ok(text) => self.send_raw(text),
            Err(_) => false,
        }
    }

    /// Close the link with a close code
    pub fn close(self, code: Option<u16>, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Whether the client side has dropped the link
    pub fn is_client_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
