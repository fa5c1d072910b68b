//! Engine runtime
//!
//! `EngineState` is the single owner of presence, typing, sequencing and
//! reaction state. The runtime runs it on one tokio task, feeding it commands
//! and timer ticks and executing the effects it returns.

mod clock;
mod config;
mod runtime;
mod sink;
mod state;
mod view;

pub use clock::TokioClock;
pub use config::EngineConfig;
pub use runtime::{Engine, EngineBuilder, EngineHandle, TopicFeed};
pub use sink::EventSink;
pub use state::{Effect, EngineState};
pub use view::TopicView;
