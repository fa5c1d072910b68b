//! Value objects - immutable keys the engine indexes state by

mod ids;

pub use ids::{TopicId, UserId};
