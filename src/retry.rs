//! Retry policy and per-call retry bookkeeping

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tracing::debug;

use crate::error::{Failure, FailureKind};

/// Bounds for retrying a single logical call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-attempts allowed after transient failures
    pub max_retries: u32,
    /// Delay before the first re-attempt
    pub base_delay: Duration,
    /// Upper cap on any single delay
    pub max_delay: Duration,
    /// Wait at least as long as a provider-supplied Retry-After
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that fails on the first error
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before re-attempt `n` (1-indexed): `base_delay * 2^(n-1)`, capped
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Fresh bookkeeping for one logical call
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: self.clone(),
            schedule: self.schedule(),
            attempts: 0,
            retries: 0,
            refreshed: false,
            total_wait: Duration::ZERO,
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then re-attempt
    Retry(Duration),
    /// Refresh the credential, then re-attempt immediately
    RefreshCredentials,
    /// Surface the failure
    GiveUp,
}

/// Attempt counter and cumulative wait for a single logical call
///
/// Never shared across calls. The one credential refresh does not consume
/// the transient retry budget.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    schedule: ExponentialBackoff,
    attempts: u32,
    retries: u32,
    refreshed: bool,
    total_wait: Duration,
}

impl RetryState {
    /// Record that a transport call is about to be issued
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn total_wait(&self) -> Duration {
        self.total_wait
    }

    /// Classify-driven decision for the failure of the latest attempt
    pub fn decide(&mut self, failure: &Failure, can_refresh: bool) -> RetryDecision {
        match &failure.kind {
            FailureKind::Permanent => RetryDecision::GiveUp,
            FailureKind::AuthExpired => {
                if can_refresh && !self.refreshed {
                    self.refreshed = true;
                    RetryDecision::RefreshCredentials
                } else {
                    RetryDecision::GiveUp
                }
            }
            FailureKind::Transient | FailureKind::RateLimited { .. } => {
                if self.retries >= self.policy.max_retries {
                    return RetryDecision::GiveUp;
                }
                self.retries += 1;

                let mut delay = self
                    .schedule
                    .next_backoff()
                    .unwrap_or(self.policy.max_delay);
                if let FailureKind::RateLimited {
                    retry_after: Some(hint),
                } = failure.kind
                {
                    if self.policy.honor_retry_after && hint > delay {
                        debug!("Honoring provider retry hint of {:?}", hint);
                        delay = hint.min(self.policy.max_delay);
                    }
                }

                self.total_wait += delay;
                RetryDecision::Retry(delay)
            }
        }
    }
}
