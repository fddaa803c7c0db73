//! Admission limits and the pure admission decision.

use std::time::Duration;

use crate::core::window::SlidingWindow;
use crate::error::ConfigError;

/// Limits for one scarce downstream resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub max_requests_per_window: usize,
    /// Cost units (e.g. tokens) allowed per window.
    pub max_cost_per_window: u64,
    pub max_concurrent: usize,
    /// Length of the sliding window.
    pub window: Duration,
    /// Lower bound on a rate-limited caller's sleep between rechecks.
    pub min_wait: Duration,
    /// Upper bound on a rate-limited caller's sleep between rechecks.
    pub max_wait: Duration,
    /// Slack added past the oldest record's expiry before rechecking.
    pub expiry_buffer: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 50,
            max_cost_per_window: 100_000,
            max_concurrent: 5,
            window: Duration::from_secs(60),
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(5),
            expiry_buffer: Duration::from_millis(100),
        }
    }
}

impl RateLimiterConfig {
    /// Convenience constructor keeping the default window and wait bounds.
    pub fn with_limits(
        max_requests_per_window: usize,
        max_cost_per_window: u64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            max_requests_per_window,
            max_cost_per_window,
            max_concurrent,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests_per_window == 0 {
            return Err(ConfigError::invalid("max_requests_per_window must be > 0"));
        }
        if self.max_cost_per_window == 0 {
            return Err(ConfigError::invalid("max_cost_per_window must be > 0"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be > 0"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::invalid("window must be > 0"));
        }
        if self.min_wait.is_zero() {
            return Err(ConfigError::invalid("min_wait must be > 0"));
        }
        if self.min_wait > self.max_wait {
            return Err(ConfigError::invalid(format!(
                "min_wait {:?} exceeds max_wait {:?}",
                self.min_wait, self.max_wait
            )));
        }
        Ok(())
    }

    /// Sleep interval for a rate-limited caller, clamped to `[min_wait, max_wait]`.
    pub fn recheck_interval(&self, until_oldest_expires: Option<Duration>) -> Duration {
        let wanted = until_oldest_expires
            .map(|wait| wait.saturating_add(self.expiry_buffer))
            .unwrap_or(self.min_wait);
        wanted.clamp(self.min_wait, self.max_wait)
    }
}

/// Why a request cannot be admitted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Concurrency,
    RequestRate,
    CostBudget,
}

impl BlockReason {
    pub fn label(self) -> &'static str {
        match self {
            BlockReason::Concurrency => "concurrency",
            BlockReason::RequestRate => "request_rate",
            BlockReason::CostBudget => "cost_budget",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready,
    Blocked(BlockReason),
}

impl Admission {
    pub fn is_ready(self) -> bool {
        self == Admission::Ready
    }
}

/// Decide whether `cost` may be admitted.
///
/// Checks run in a fixed order (concurrency, request rate, cost budget) and the
/// first failing check is reported. `window` must already be pruned.
pub fn decide(
    config: &RateLimiterConfig,
    active_requests: usize,
    window: &SlidingWindow,
    cost: u64,
) -> Admission {
    if active_requests >= config.max_concurrent {
        return Admission::Blocked(BlockReason::Concurrency);
    }
    rate_decision(config, window, cost)
}

/// The rate half of [`decide`], for callers that already hold a concurrency slot.
pub fn rate_decision(config: &RateLimiterConfig, window: &SlidingWindow, cost: u64) -> Admission {
    if window.request_count() >= config.max_requests_per_window {
        return Admission::Blocked(BlockReason::RequestRate);
    }
    if window.cost_sum().saturating_add(cost) > config.max_cost_per_window {
        return Admission::Blocked(BlockReason::CostBudget);
    }
    Admission::Ready
}
