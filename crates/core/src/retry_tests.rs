// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn exponential_growth_without_jitter() {
    let policy = RetryPolicy::fixed(1_000, 60_000);

    assert_eq!(policy.delay_ms(1), 1_000);
    assert_eq!(policy.delay_ms(2), 2_000);
    assert_eq!(policy.delay_ms(3), 4_000);
    assert_eq!(policy.delay_ms(4), 8_000);
}

#[test]
fn delay_caps() {
    let policy = RetryPolicy::fixed(1_000, 5_000);
    assert_eq!(policy.delay_ms(4), 5_000);
    assert_eq!(policy.delay_ms(30), 5_000);
    // Huge attempt counts must not overflow
    assert_eq!(policy.delay_ms(u32::MAX), 5_000);
}

#[test]
fn attempt_zero_and_one_share_base() {
    let policy = RetryPolicy::fixed(500, 60_000);
    assert_eq!(policy.delay_ms(0), 500);
    assert_eq!(policy.delay_ms(1), 500);
}

#[test]
fn jitter_stays_in_band() {
    let policy = RetryPolicy {
        base_ms: 1_000,
        factor: 2.0,
        cap_ms: 60_000,
        jitter: 0.1,
    };

    for _ in 0..100 {
        let delay = policy.delay_ms(2);
        assert!((1_800..=2_200).contains(&delay), "delay {} out of band", delay);
    }
}

#[test]
fn max_delay_includes_jitter() {
    let policy = RetryPolicy {
        base_ms: 1_000,
        factor: 2.0,
        cap_ms: 10_000,
        jitter: 0.5,
    };
    assert_eq!(policy.max_delay_ms(), 15_000);
}
