//! Reconnect Backoff

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.base,
        }
    }

    /// Start over from the base delay (after a successful connect)
    pub fn reset(&mut self) {
        self.current = self.config.base;
    }

    /// Delay before the next attempt; doubles the base for the one after
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.min(self.config.cap);
        self.current = (self.current * 2).min(self.config.cap);
        apply_jitter(base, self.config.jitter)
    }
}

/// Spread `base` uniformly within ±`jitter` of itself
fn apply_jitter(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let factor = rand::thread_rng().gen_range(-jitter..=jitter);
    base.mul_f64((1.0 + factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::new(no_jitter());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..200 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(799), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1201), "{:?}", delay);
        }
    }
}
