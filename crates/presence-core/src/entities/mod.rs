//! Domain entities - transient, in-memory state scoped to a live connection

mod presence;
mod reaction;
mod typing;
mod user;

pub use presence::PresenceEntry;
pub use reaction::{ReactionBoard, ReactionChange, ReactionCount};
pub use typing::TypingState;
pub use user::UserRef;
