//! Fixed-window rate limiting keyed by client identifier.
//!
//! The map is process-wide state created once in `build_state_from_env` and
//! shared by every handler.  Each check holds the entry's shard lock for the
//! whole read-modify-write, so concurrent requests from the same client
//! cannot lose increments.  Counters are per process; replicas do not share
//! them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;

/// Bucket used when neither forwarding header is present.  Every such
/// client shares it.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const DEFAULT_MAX_REQUESTS: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow { count: u32 },
    Deny { count: u32 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow { .. })
    }
}

#[derive(Clone)]
pub struct FixedWindowLimiter {
    entries: Arc<DashMap<String, RateLimitEntry, ahash::RandomState>>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request from `client` and decide whether it may proceed.
    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// Same as `check` with an explicit clock reading.  A denied request
    /// still counts toward the window.
    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let mut entry = self
            .entries
            .entry(client.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });
        if entry.count == 0 || now.saturating_duration_since(entry.window_start) > self.window {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        let count = entry.count;
        if count > self.max_requests {
            RateDecision::Deny { count }
        } else {
            RateDecision::Allow { count }
        }
    }

    /// Current entry for `client`, if any.
    pub fn entry(&self, client: &str) -> Option<RateLimitEntry> {
        self.entries.get(client).map(|e| *e)
    }

    /// Number of tracked client identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose window has already expired; the next request from
    /// such a client would reset the counter anyway.  Returns how many were
    /// removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.window_start) <= window);
        before.saturating_sub(self.entries.len())
    }
}

/// Periodically drop expired entries.  Without this the map keeps one entry
/// per client identifier ever seen.
pub fn spawn_sweeper(limiter: FixedWindowLimiter, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_expired(Instant::now());
            if removed > 0 {
                tracing::debug!(removed, remaining = limiter.len(), "swept expired rate-limit entries");
            }
        }
    })
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

/// Resolve the rate-limit key for a request: first entry of
/// `x-forwarded-for`, then `x-real-ip`, else the shared `unknown` bucket.
/// Empty values fall through to the next source.
pub fn client_identifier(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
