//! Connection management
//!
//! The `Connector` seam that produces links, its WebSocket and in-memory
//! implementations, and the reconnect backoff policy.

mod backoff;
mod connector;
mod memory;
mod websocket;

pub use backoff::Backoff;
pub use connector::{Connector, Link, LinkEvent};
pub use memory::{memory_pair, MemoryConnector, MemoryServer, ServerLink};
pub use websocket::WebSocketConnector;
