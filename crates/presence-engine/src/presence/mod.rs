//! Per-topic presence rosters

mod tracker;

pub use tracker::PresenceTracker;
