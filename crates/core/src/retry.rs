// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uniform retry policy for failed tasks.
//!
//! One policy value configured on the engine; call sites never hand-roll
//! their own delays. Retryable failures are scheduled into the
//! `delayed:{class}` set at `now + delay_ms(attempt)`.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with a cap and proportional jitter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_ms: u64,
    /// Multiplier per subsequent attempt
    pub factor: f64,
    /// Upper bound on any delay
    pub cap_ms: u64,
    /// Fraction of the delay used as +/- jitter (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2.0,
            cap_ms: 60_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, for deterministic tests.
    pub fn fixed(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            factor: 2.0,
            cap_ms,
            jitter: 0.0,
        }
    }

    /// Delay before attempt `attempt + 1` becomes eligible.
    ///
    /// `attempt` is the number of claims already consumed, so the first
    /// retry (after attempt 1) waits `base_ms`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base_ms as f64 * self.factor.powi(exponent as i32);
        let capped = raw.min(self.cap_ms as f64);

        if self.jitter <= 0.0 {
            return capped as u64;
        }

        let spread = capped * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        (capped + offset).max(0.0) as u64
    }

    /// Largest delay this policy can produce, jitter included.
    pub fn max_delay_ms(&self) -> u64 {
        (self.cap_ms as f64 * (1.0 + self.jitter)) as u64
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
