//! Connector seam
//!
//! A connector opens one link to the backend. The transport owns reconnect
//! policy; connectors only know how to dial once.

use crate::error::TransportResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Event read from an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame
    Text(String),
    /// The peer closed the link, or the link failed
    Closed { code: Option<u16>, reason: String },
}

/// An open bidirectional link
///
/// Dropping `outgoing` closes the link from the client side.
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial the backend once
    async fn connect(&self) -> TransportResult<Link>;
}
