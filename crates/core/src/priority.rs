// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority bands and the age-boosted effective priority score.
//!
//! `pending:{class}` sorted sets are keyed by `effective_priority`, the base
//! band weight multiplied by a boost that grows with queue residency. The
//! boost is capped at 3x so a `normal` task can never overtake a `critical`
//! task of the same age, while an old `low` task eventually passes a fresh
//! one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Residency time after which the age boost reaches its cap.
const BOOST_RAMP_SECONDS: f64 = 600.0;

/// Maximum multiplier applied by the age boost (1 + 2 = 3x).
const BOOST_CAP: f64 = 2.0;

/// Priority band of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Deferred,
}

impl Priority {
    /// Base weight used in the effective priority score.
    pub fn base_score(&self) -> f64 {
        match self {
            Priority::Critical => 10.0,
            Priority::High => 5.0,
            Priority::Normal => 1.0,
            Priority::Low => 0.5,
            Priority::Deferred => 0.1,
        }
    }

    /// All bands in descending rank order.
    pub fn all() -> [Priority; 5] {
        [
            Priority::Critical,
            Priority::High,
            Priority::Normal,
            Priority::Low,
            Priority::Deferred,
        ]
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
            Priority::Deferred => write!(f, "deferred"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "deferred" => Ok(Priority::Deferred),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Age boost for a task that has been queued for `age_ms`.
///
/// `1 + min(age_seconds / 600, 2)`, monotonically non-decreasing, capped at
/// 3x after ten minutes of residency.
pub fn age_boost(age_ms: u64) -> f64 {
    let age_seconds = age_ms as f64 / 1000.0;
    1.0 + (age_seconds / BOOST_RAMP_SECONDS).min(BOOST_CAP)
}

/// Effective priority of a task submitted at `submitted_at_ms`, as of `now_ms`.
pub fn effective_priority(priority: Priority, submitted_at_ms: u64, now_ms: u64) -> f64 {
    let age_ms = now_ms.saturating_sub(submitted_at_ms);
    priority.base_score() * age_boost(age_ms)
}

#[cfg(test)]
#[path = "priority_tests.rs"]
mod tests;
