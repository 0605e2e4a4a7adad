// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::rate_limiter::{compute_rate_limiting_rate, RateLimiter};
use ddcommon::tag::Tag;
use dogstatsd_client::{DogStatsDAction, Flusher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const OOM_KILL_THRESHOLD: f64 = 1.5;
const NUM_CPUS_TARGET: f64 = 1.0;

/// Resident-set size in bytes, read from `/proc/self/status` on Linux.
#[cfg(target_os = "linux")]
fn sample_heap_bytes() -> f64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0.0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            if let Some(kb) = rest.trim().split_whitespace().next() {
                if let Ok(kb) = kb.parse::<f64>() {
                    return kb * 1024.0;
                }
            }
        }
    }
    0.0
}

#[cfg(not(target_os = "linux"))]
fn sample_heap_bytes() -> f64 {
    0.0
}

/// Per-core user-time average, approximated from `/proc/self/stat` utime
/// delta between ticks (in clock ticks, converted via `sysconf(_SC_CLK_TCK)`).
#[cfg(target_os = "linux")]
fn sample_utime_ticks() -> u64 {
    let Ok(stat) = std::fs::read_to_string("/proc/self/stat") else {
        return 0;
    };
    // utime is field 14; fields before it may contain spaces inside `(comm)`.
    let after_comm = stat.rfind(')').map(|i| &stat[i + 2..]).unwrap_or(&stat);
    after_comm
        .split_whitespace()
        .nth(11)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn sample_utime_ticks() -> u64 {
    0
}

/// Publishes heartbeat/rate/out-channel-fill gauges and enforces an OOM
/// hard-kill if resident memory exceeds 1.5x the configured cap. Runs as its
/// own background task on `interval`.
pub struct Watchdog {
    max_memory_bytes: f64,
    interval: Duration,
    rate_limiter: Arc<RateLimiter>,
    last_utime_ticks: u64,
    flusher: Arc<Flusher>,
}

impl Watchdog {
    pub fn new(
        max_memory_bytes: f64,
        interval: Duration,
        rate_limiter: Arc<RateLimiter>,
        flusher: Arc<Flusher>,
    ) -> Self {
        Watchdog {
            max_memory_bytes,
            interval,
            rate_limiter,
            last_utime_ticks: sample_utime_ticks(),
            flusher,
        }
    }

    fn send_gauges(&self, heartbeat: f64, rate: f64, out_channel_fill: f64) {
        let no_tags: Vec<Tag> = Vec::new();
        self.flusher.send(vec![
            DogStatsDAction::Gauge("trace_agent.watchdog.heartbeat", heartbeat, no_tags.clone()),
            DogStatsDAction::Gauge("trace_agent.watchdog.rate", rate, no_tags.clone()),
            DogStatsDAction::Gauge(
                "trace_agent.watchdog.out_channel_fill",
                out_channel_fill,
                no_tags,
            ),
        ]);
    }

    /// Runs one tick of the watchdog loop, returning `true` if the process
    /// should terminate (heap usage exceeded the hard-kill threshold).
    pub fn tick(&mut self, out_channel_fill: f64) -> bool {
        let heap = sample_heap_bytes();
        if heap > OOM_KILL_THRESHOLD * self.max_memory_bytes {
            error!(
                heap_bytes = heap,
                max_memory_bytes = self.max_memory_bytes,
                "watchdog: heap usage exceeded hard-kill threshold, terminating"
            );
            self.send_gauges(0.0, self.rate_limiter.target_rate(), out_channel_fill);
            return true;
        }

        let utime = sample_utime_ticks();
        let cpu_ticks_delta = utime.saturating_sub(self.last_utime_ticks) as f64;
        self.last_utime_ticks = utime;

        let rate_mem = compute_rate_limiting_rate(
            self.max_memory_bytes,
            heap,
            self.rate_limiter.target_rate(),
        );
        let rate_cpu = compute_rate_limiting_rate(
            NUM_CPUS_TARGET,
            cpu_ticks_delta / self.interval.as_secs_f64().max(1.0),
            self.rate_limiter.target_rate(),
        );
        let effective = rate_mem.min(rate_cpu);
        self.rate_limiter.set_target_rate(effective);

        info!(
            heap_bytes = heap,
            rate_mem,
            rate_cpu,
            effective_rate = effective,
            out_channel_fill,
            "watchdog heartbeat"
        );
        self.send_gauges(1.0, effective, out_channel_fill);
        false
    }

    /// Spawns the watchdog loop; on hard-kill the future resolves and the
    /// caller is expected to exit the process.
    pub async fn run(mut self, out_channel_fill: impl Fn() -> f64) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if self.tick(out_channel_fill()) {
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_does_not_hard_kill_under_threshold() {
        let rl = Arc::new(RateLimiter::new(1.0));
        let mut watchdog = Watchdog::new(
            1_000_000_000.0,
            Duration::from_secs(10),
            rl,
            Arc::new(Flusher::default()),
        );
        assert!(!watchdog.tick(0.0));
    }
}
