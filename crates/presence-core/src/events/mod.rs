//! Activity events - the immutable records fanned out to topic subscribers

mod activity_event;

pub use activity_event::{ActivityEvent, ActivityKind, ReactionPayload};
