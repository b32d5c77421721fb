//! Prometheus-style counters for the relay.  Everything is a relaxed atomic;
//! exposition is plain text format 0.0.4.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::Outcome;

const BUCKET_COUNT: usize = 12;
/// Upstream latency bucket upper bounds in milliseconds.
const LATENCY_BUCKETS_MS: [u64; BUCKET_COUNT] = [
    5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000,
];

pub struct RelayMetrics {
    requests_total: AtomicU64,
    outcomes: [AtomicU64; Outcome::COUNT],
    upstream_hist: [AtomicU64; BUCKET_COUNT],
    upstream_sum_ms: AtomicU64,
    upstream_count: AtomicU64,
    process_start_epoch: f64,
    process_start_instant: Instant,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        let start = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            requests_total: AtomicU64::new(0),
            outcomes: std::array::from_fn(|_| AtomicU64::new(0)),
            upstream_hist: std::array::from_fn(|_| AtomicU64::new(0)),
            upstream_sum_ms: AtomicU64::new(0),
            upstream_count: AtomicU64::new(0),
            process_start_epoch: start.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Observe the duration of one downstream call, successful or not.
    pub fn observe_upstream_ms(&self, ms: u64) {
        self.upstream_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.upstream_count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| ms <= *ub) {
            self.upstream_hist[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn outcome_total(&self, outcome: Outcome) -> u64 {
        self.outcomes[outcome.index()].load(Ordering::Relaxed)
    }

    pub fn upstream_count(&self) -> u64 {
        self.upstream_count.load(Ordering::Relaxed)
    }

    /// Render the exposition text.  Gauges owned elsewhere are passed in.
    pub fn render(&self, rate_limit_keys: usize, telemetry_lines: u64, telemetry_errors: u64) -> String {
        let mut buf = String::new();
        writeln!(buf, "# HELP relay_requests_total Relay requests handled (preflight excluded)").ok();
        writeln!(buf, "# TYPE relay_requests_total counter").ok();
        writeln!(buf, "relay_requests_total {}", self.requests_total()).ok();

        writeln!(buf, "# HELP relay_outcomes_total Relay requests by outcome").ok();
        writeln!(buf, "# TYPE relay_outcomes_total counter").ok();
        for outcome in Outcome::ALL {
            writeln!(
                buf,
                "relay_outcomes_total{{outcome=\"{}\"}} {}",
                outcome.as_str(),
                self.outcome_total(outcome)
            )
            .ok();
        }

        writeln!(buf, "# HELP relay_upstream_latency_ms Downstream webhook latency histogram milliseconds").ok();
        writeln!(buf, "# TYPE relay_upstream_latency_ms histogram").ok();
        let mut cumulative = 0u64;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.upstream_hist[i].load(Ordering::Relaxed);
            writeln!(buf, "relay_upstream_latency_ms_bucket{{le=\"{}\"}} {}", ub, cumulative).ok();
        }
        let count = self.upstream_count();
        writeln!(buf, "relay_upstream_latency_ms_bucket{{le=\"+Inf\"}} {}", count).ok();
        writeln!(
            buf,
            "relay_upstream_latency_ms_sum {}",
            self.upstream_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(buf, "relay_upstream_latency_ms_count {}", count).ok();

        writeln!(buf, "# HELP relay_rate_limit_keys Client identifiers currently tracked by the rate limiter").ok();
        writeln!(buf, "# TYPE relay_rate_limit_keys gauge").ok();
        writeln!(buf, "relay_rate_limit_keys {}", rate_limit_keys).ok();

        writeln!(buf, "# HELP relay_telemetry_lines_total Relay event lines written").ok();
        writeln!(buf, "# TYPE relay_telemetry_lines_total counter").ok();
        writeln!(buf, "relay_telemetry_lines_total {}", telemetry_lines).ok();
        writeln!(buf, "# HELP relay_telemetry_write_errors_total Relay event line write failures").ok();
        writeln!(buf, "# TYPE relay_telemetry_write_errors_total counter").ok();
        writeln!(buf, "relay_telemetry_write_errors_total {}", telemetry_errors).ok();

        writeln!(buf, "# HELP relay_build_info Build information\n# TYPE relay_build_info gauge").ok();
        writeln!(buf, "relay_build_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION")).ok();
        writeln!(
            buf,
            "# HELP relay_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE relay_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(buf, "relay_process_start_time_seconds {}", self.process_start_epoch).ok();
        writeln!(
            buf,
            "# HELP relay_process_uptime_seconds Process uptime seconds\n# TYPE relay_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            buf,
            "relay_process_uptime_seconds {}",
            self.process_start_instant.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}
