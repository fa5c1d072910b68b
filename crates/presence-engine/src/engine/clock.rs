//! Clock backed by tokio's timer

use presence_core::{Clock, SystemClock};
use tokio::time::Instant;

/// Epoch-millisecond clock that advances with `tokio::time`
///
/// Under a paused runtime (`start_paused`, `tokio::time::advance`) it moves
/// exactly as the engine's tick and sweep intervals do, so deadlines computed
/// from it line up with the timers that check them.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_ms: i64,
    origin: Instant,
}

impl TokioClock {
    /// Start at the current wall-clock time
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    /// Start at `epoch_ms`
    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            origin_ms: epoch_ms,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        self.origin_ms + self.origin.elapsed().as_millis() as i64
    }
}
