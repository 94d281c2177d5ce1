//! Minimum-spacing rate limiter keyed by endpoint group
//!
//! Every provider operation belongs to an endpoint group (for example
//! `gmail.messages` or `slack.chat`). Calls within one group are spaced at
//! least `min_request_interval` apart:
//! - No token bucket and no burst allowance
//! - A zero interval disables throttling for that group
//! - The last-call timestamp is recorded whether or not the call then succeeds
//!
//! Clones share state, so one limiter must be constructed per account and
//! handed to every facade talking to that account.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    default_interval: Duration,
    intervals: Arc<HashMap<String, Duration>>,
    inner: Arc<Mutex<LimiterState>>,
}

#[derive(Debug, Default)]
struct LimiterState {
    /// Start time reserved for the most recent call per group
    last_call: HashMap<String, Instant>,
    /// Calls admitted (for stats)
    total_calls: u64,
    /// Calls that had to wait (for stats)
    delayed_calls: u64,
    /// Sum of all waits (for stats)
    total_wait: Duration,
}

impl RateLimiter {
    /// Create a limiter applying `default_interval` to every group
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: Arc::new(HashMap::new()),
            inner: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Override the interval for one endpoint group
    pub fn with_interval(mut self, group: impl Into<String>, interval: Duration) -> Self {
        Arc::make_mut(&mut self.intervals).insert(group.into(), interval);
        self
    }

    pub fn interval_for(&self, group: &str) -> Duration {
        self.intervals
            .get(group)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Block until the group's interval has elapsed since its previous call
    ///
    /// The caller's slot is reserved before sleeping, so concurrent callers on
    /// one group queue up one interval apart. Returns how long this call waited.
    pub async fn wait_if_needed(&self, group: &str) -> Duration {
        let interval = self.interval_for(group);

        let wait = {
            let mut state = self.inner.lock().await;
            let now = Instant::now();

            let ready_at = match state.last_call.get(group) {
                Some(last) if !interval.is_zero() => (*last + interval).max(now),
                _ => now,
            };
            state.last_call.insert(group.to_string(), ready_at);

            let wait = ready_at.saturating_duration_since(now);
            state.total_calls += 1;
            if !wait.is_zero() {
                state.delayed_calls += 1;
                state.total_wait += wait;
            }

            trace!(
                "Rate limiter [{}]: interval {:?}, wait {:?}",
                group,
                interval,
                wait
            );
            wait
        };

        // Sleep outside the lock so other groups proceed
        if !wait.is_zero() {
            debug!("Throttling {} for {:.3}s", group, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
        wait
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.inner.lock().await;
        RateLimiterStats {
            total_calls: state.total_calls,
            delayed_calls: state.delayed_calls,
            total_wait: state.total_wait,
            groups: state.last_call.len(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Statistics about throttling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_calls: u64,
    pub delayed_calls: u64,
    pub total_wait: Duration,
    /// Endpoint groups seen so far
    pub groups: usize,
}
