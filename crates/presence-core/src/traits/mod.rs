//! Ports - interfaces the engine depends on but does not implement

mod clock;
mod history;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use history::{HistoryApi, HistoryError};
