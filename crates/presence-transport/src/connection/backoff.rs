//! Exponential reconnect backoff

use presence_common::TransportConfig;
use std::time::Duration;

/// Exponential backoff: `base * factor^attempt`, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    factor: f64,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base_ms: u64, max_ms: u64, factor: f64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            factor: factor.max(1.0),
            attempt: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.reconnect_base_ms,
            config.reconnect_max_ms,
            config.reconnect_factor,
        )
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let raw = self.base_ms as f64 * self.factor.powi(exponent);
        let delay = if raw.is_finite() {
            raw.min(self.max_ms as f64) as u64
        } else {
            self.max_ms
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay)
    }

    /// Forget previous failures (called after a successful connect)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(100, 1_000, 2.0);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_many_attempts_stay_at_cap() {
        let mut backoff = Backoff::new(1_000, 30_000, 2.0);
        for _ in 0..10_000 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(30_000));
    }
}
