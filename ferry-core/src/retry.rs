//! Retry policy for chunk delivery.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How many attempts a chunk gets and how long to wait between them.
pub trait RetryStrategy {
    /// Total attempts per chunk, including the first one.
    fn max_attempts(&self) -> u32;

    /// Delay before attempt number `attempt` (1-based). Attempt 1 is never delayed.
    fn delay_before(&self, attempt: u32) -> Duration;
}

/// Delay between attempts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        base_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter_ms: u64,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Backoff::None }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }
}

impl RetryStrategy for RetryPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential { base_ms, max_ms, jitter_ms } => {
                let exp = 2u64.saturating_pow(attempt.saturating_sub(2));
                let delay_ms = base_ms.saturating_mul(exp).min(*max_ms);
                let jitter = if *jitter_ms > 0 {
                    rand::thread_rng().gen_range(0..=*jitter_ms)
                } else {
                    0
                };
                Duration::from_millis(delay_ms.saturating_add(jitter))
            }
        }
    }
}

/// Waits out retry delays. Swapped out in tests.
pub trait Sleeper {
    fn sleep(&self, d: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}
