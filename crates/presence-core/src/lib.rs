//! # presence-core
//!
//! Domain layer for the real-time presence engine: topic and user identifiers,
//! presence entries, typing state, reactions, activity events, and the ports
//! (clock, history API) the engine talks to. No runtime or network code lives here.

pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{PresenceEntry, ReactionBoard, ReactionChange, ReactionCount, TypingState, UserRef};
pub use error::DomainError;
pub use events::{ActivityEvent, ActivityKind, ReactionPayload};
pub use traits::{Clock, HistoryApi, HistoryError, ManualClock, SharedClock, SystemClock};
pub use value_objects::{TopicId, UserId};
