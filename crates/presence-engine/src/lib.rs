//! # presence-engine
//!
//! Presence tracking, typing indicators and ordered event fanout for
//! real-time topics.
//!
//! ## Overview
//!
//! - **Presence**: per-topic rosters with heartbeat refresh and timed eviction
//! - **Typing**: start/stop/expire state machine plus outbound debouncing
//! - **Fanout**: per-topic sequencing, duplicate suppression, gap resync and
//!   delivery to subscribers
//! - **Engine**: one task owning all of the above, driven by commands and timers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use presence_engine::EngineBuilder;
//!
//! let (engine, _task) = EngineBuilder::new(me, Arc::new(transport), history).spawn();
//! let mut feed = engine.open_topic(topic_id.clone()).await?;
//! engine.join(&topic_id)?;
//!
//! while let Some(update) = feed.updates.recv().await {
//!     // render
//! }
//! ```

pub mod engine;
pub mod fanout;
pub mod presence;
pub mod typing;

// Re-export commonly used types
pub use engine::{
    Effect, Engine, EngineBuilder, EngineConfig, EngineHandle, EngineState, EventSink, TokioClock,
    TopicFeed, TopicView,
};
pub use fanout::{Admission, FanoutHub, FanoutSubscription, TopicSequencer, TopicUpdate};
pub use presence::PresenceTracker;
pub use typing::{TypingDebouncer, TypingMachine};
