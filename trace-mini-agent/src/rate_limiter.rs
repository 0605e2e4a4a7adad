// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::RwLock;

const DECAY_FACTOR: f64 = 8.0 / 9.0;
const DELTA_MIN: f64 = 0.15;
const RATE_MIN: f64 = 0.05;

#[derive(Debug, Default)]
struct Counters {
    recent_traces_seen: f64,
    recent_traces_dropped: f64,
    recent_payloads_seen: f64,
    target_rate: f64,
}

/// Rolling-window admission controller for incoming trace payloads.
///
/// A single `RwLock` guards all three counters; `decay_score` runs on its own
/// ticker (every 5s) and halves their influence by repeatedly applying an
/// 8/9 decay factor.
pub struct RateLimiter {
    counters: RwLock<Counters>,
}

impl RateLimiter {
    pub fn new(target_rate: f64) -> Self {
        RateLimiter {
            counters: RwLock::new(Counters {
                target_rate,
                ..Default::default()
            }),
        }
    }

    /// Decides whether `n` additional traces (from a single payload) may be
    /// admitted, updating the rolling counters as a side effect.
    ///
    /// Order matters: the admission check reads `real_rate` before this
    /// call's own traces are folded into `recent_traces_seen`, so a single
    /// payload can never cause its own rejection.
    pub fn permits(&self, n: i64) -> bool {
        if n <= 0 {
            return true;
        }
        let mut counters = self.counters.write().unwrap();
        let real_rate = if counters.recent_traces_seen == 0.0 {
            counters.target_rate
        } else {
            1.0 - counters.recent_traces_dropped / counters.recent_traces_seen
        };
        let allow = real_rate <= counters.target_rate;
        if !allow {
            counters.recent_traces_dropped += n as f64;
        }
        counters.recent_payloads_seen += 1.0;
        counters.recent_traces_seen += n as f64;
        allow
    }

    /// Current admission rate, as handed out to clients via `Datadog-...-Rate` responses.
    pub fn target_rate(&self) -> f64 {
        self.counters.read().unwrap().target_rate
    }

    pub fn set_target_rate(&self, rate: f64) {
        self.counters.write().unwrap().target_rate = rate;
    }

    /// Decays all rolling counters. Intended to be called on a 5s ticker.
    pub fn decay_score(&self) {
        let mut counters = self.counters.write().unwrap();
        counters.recent_traces_seen *= DECAY_FACTOR;
        counters.recent_traces_dropped *= DECAY_FACTOR;
        counters.recent_payloads_seen *= DECAY_FACTOR;
    }
}

/// Suggests a new admission rate given a resource cap (`max`), its current
/// observed usage (`current`), and the presently configured `rate`.
///
/// Applies hysteresis (`delta_min`) to avoid jitter and smooths large swings
/// by taking the midpoint between the old and new rate, clamped at `rate_min`.
pub fn compute_rate_limiting_rate(max: f64, current: f64, rate: f64) -> f64 {
    if !max.is_finite() || !current.is_finite() || !rate.is_finite() {
        return 1.0;
    }
    if max < 0.0 || current < 0.0 || rate < 0.0 || max == 0.0 || current == 0.0 {
        return 1.0;
    }
    let new_rate = rate * max / current;
    if new_rate >= 1.0 {
        return 1.0;
    }
    let relative_change = (new_rate - rate).abs() / rate;
    if relative_change < DELTA_MIN {
        return rate;
    }
    ((new_rate + rate) / 2.0).max(RATE_MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_n_is_always_permitted() {
        let rl = RateLimiter::new(1.0);
        assert!(rl.permits(0));
        assert!(rl.permits(-5));
    }

    #[test]
    fn first_payload_is_never_dropped_when_target_is_full_rate() {
        let rl = RateLimiter::new(1.0);
        assert!(rl.permits(100));
    }

    #[test]
    fn drops_once_observed_rate_exceeds_target() {
        let rl = RateLimiter::new(0.5);
        // First payload: seen == 0 so real_rate defaults to target, always admitted.
        assert!(rl.permits(10));
        // real_rate is now 1.0 (nothing dropped yet), which exceeds the 0.5 target: reject.
        assert!(!rl.permits(10));
    }

    #[test]
    fn decay_score_shrinks_counters_toward_zero() {
        let rl = RateLimiter::new(1.0);
        rl.permits(100);
        rl.decay_score();
        let counters = rl.counters.read().unwrap();
        assert!(counters.recent_traces_seen < 100.0);
        assert!(counters.recent_traces_seen > 0.0);
    }

    #[test]
    fn compute_rate_rejects_invalid_or_zero_current() {
        assert_eq!(compute_rate_limiting_rate(100.0, 0.0, 0.5), 1.0);
        assert_eq!(compute_rate_limiting_rate(0.0, 10.0, 0.5), 1.0);
        assert_eq!(compute_rate_limiting_rate(f64::NAN, 10.0, 0.5), 1.0);
        assert_eq!(compute_rate_limiting_rate(-1.0, 10.0, 0.5), 1.0);
    }

    #[test]
    fn compute_rate_applies_hysteresis_below_delta_min() {
        // new = rate * max / current = 0.5 * 100 / 105 ~= 0.476, relative change ~0.047 < 0.15
        let result = compute_rate_limiting_rate(100.0, 105.0, 0.5);
        assert_eq!(result, 0.5);
    }

    #[test]
    fn compute_rate_smooths_large_swings_toward_midpoint() {
        // new = 0.5 * 100 / 300 ~= 0.1667, relative change ~0.667 >= 0.15
        let result = compute_rate_limiting_rate(100.0, 300.0, 0.5);
        let expected = (0.1666_666_666_666_666_7_f64 + 0.5) / 2.0;
        assert!((result - expected).abs() < 1e-9);
    }

    #[test]
    fn compute_rate_clamps_to_rate_min() {
        let result = compute_rate_limiting_rate(1.0, 1000.0, 0.1);
        assert!(result >= RATE_MIN);
    }
}
