//! # presence-client
//!
//! The surface UI code consumes: a [`RealtimeClient`] per application and a
//! [`TopicHandle`] per open topic, exposing reactive presence, typing users
//! (never including yourself), message/typing/reaction actions, and a
//! `last_error` signal.
//!
//! ## Example
//!
//! ```ignore
//! use presence_client::RealtimeClient;
//! use presence_core::UserRef;
//! use presence_transport::WebSocketConnector;
//!
//! let client = RealtimeClient::builder(UserRef::new("u1", "Ada"), WebSocketConnector::new(url))
//!     .config(config)
//!     .build()?;
//! client.connect().await?;
//!
//! let mut topic = client.use_topic("thread-42").await?;
//! topic.start_typing()?;
//! topic.send_message("hello")?;
//! let view = topic.changed().await?;
//! ```

mod client;
pub mod history;
mod topic;

pub use client::{RealtimeClient, RealtimeClientBuilder};
pub use history::HttpHistoryClient;
pub use topic::TopicHandle;
