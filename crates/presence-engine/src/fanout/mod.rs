//! Activity/event fanout
//!
//! The sequencer orders and de-duplicates inbound events per topic; the hub
//! delivers the result to every subscriber of the topic.

mod hub;
mod sequencer;

pub use hub::{FanoutHub, FanoutSubscription, TopicUpdate};
pub use sequencer::{Admission, TopicSequencer};
