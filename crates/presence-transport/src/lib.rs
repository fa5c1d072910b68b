//! # presence-transport
//!
//! Maintains exactly one logical connection to the real-time backend:
//! idempotent connect, exponential-backoff reconnect, automatic topic
//! resubscription, and typed per-topic subscriptions whose handle is the disposer.

pub mod connection;
pub mod error;
pub mod protocol;
mod transport;

pub use connection::{
    memory_pair, Backoff, Connector, Link, LinkEvent, MemoryConnector, MemoryServer, ServerLink,
    WebSocketConnector,
};
pub use error::{TransportError, TransportResult};
pub use protocol::{ClientFrame, CloseCode, ServerFrame};
pub use transport::{
    Diagnostic, DiagnosticHandler, EventHandler, FatalErrorHandler, Subscription, Transport,
    TransportBuilder, TransportState,
};
