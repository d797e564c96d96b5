//! Sliding-window rate limits and the monthly token budget.
//!
//! [`RateBudgetGate`] is the single process-wide ceiling on reasoning
//! calls. It is constructed once and shared by `Arc` with the task queue
//! and anything that exports its counters, so tests can build isolated
//! instances.
//!
//! The per-minute window uses `tokio::time::Instant`, which follows the
//! paused clock in tests (`tokio::time::pause`/`advance`). The monthly
//! counter resets when the UTC calendar month changes.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Datelike, Utc};
use tokio::time::Instant;
use tracing::info;

/// Length of the trailing rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Limits enforced by [`RateBudgetGate`].
///
/// ```rust
/// # use warmpath::reasoning::BudgetConfig;
/// let config = BudgetConfig::new()
///     .max_requests_per_minute(30)
///     .monthly_token_budget(1_000_000);
/// ```
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Calls allowed in any trailing 60s window. Default: 60.
    pub max_requests_per_minute: u32,
    /// Tokens allowed in any trailing 60s window. Default: 100,000.
    pub max_tokens_per_minute: u64,
    /// Tokens allowed per calendar month. Default: 10,000,000.
    pub monthly_token_budget: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_tokens_per_minute: 100_000,
            monthly_token_budget: 10_000_000,
        }
    }
}

impl BudgetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_requests_per_minute(mut self, n: u32) -> Self {
        self.max_requests_per_minute = n;
        self
    }

    pub fn max_tokens_per_minute(mut self, n: u64) -> Self {
        self.max_tokens_per_minute = n;
        self
    }

    pub fn monthly_token_budget(mut self, n: u64) -> Self {
        self.monthly_token_budget = n;
        self
    }
}

#[derive(Debug)]
struct BudgetState {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    tokens_in_window: u64,
    monthly_tokens_used: u64,
    month: (i32, u32),
    /// Set from a service-supplied retry hint.
    hold_until: Option<Instant>,
}

impl BudgetState {
    fn prune(&mut self, now: Instant) {
        while let Some(&ts) = self.requests.front() {
            if now.duration_since(ts) < RATE_WINDOW {
                break;
            }
            self.requests.pop_front();
        }
        while let Some(&(ts, tokens)) = self.tokens.front() {
            if now.duration_since(ts) < RATE_WINDOW {
                break;
            }
            self.tokens_in_window = self.tokens_in_window.saturating_sub(tokens);
            self.tokens.pop_front();
        }
    }

    fn roll_month(&mut self) {
        let month = current_month();
        if month != self.month {
            info!(
                used = self.monthly_tokens_used,
                "new billing month, resetting token budget"
            );
            self.month = month;
            self.monthly_tokens_used = 0;
        }
    }
}

fn current_month() -> (i32, u32) {
    let now = Utc::now();
    (now.year(), now.month())
}

/// Decides whether a new reasoning call is currently permitted.
///
/// Never fails: every check returns a definite boolean and the caller
/// decides what to do when denied.
#[derive(Debug)]
pub struct RateBudgetGate {
    config: BudgetConfig,
    state: Mutex<BudgetState>,
}

impl RateBudgetGate {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BudgetState {
                requests: VecDeque::new(),
                tokens: VecDeque::new(),
                tokens_in_window: 0,
                monthly_tokens_used: 0,
                month: current_month(),
                hold_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call may be made right now: under both per-minute limits
    /// and under the monthly budget.
    pub fn allow(&self) -> bool {
        !self.is_rate_limited() && !self.is_over_budget()
    }

    /// Whether either per-minute limit is reached over the trailing window,
    /// or the service asked us to hold off.
    pub fn is_rate_limited(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        if state.hold_until.is_some_and(|until| now < until) {
            return true;
        }
        state.hold_until = None;
        state.prune(now);
        state.requests.len() >= self.config.max_requests_per_minute as usize
            || state.tokens_in_window >= self.config.max_tokens_per_minute
    }

    /// Report rate limited for `duration`, e.g. after a 429 with a
    /// `Retry-After` hint. A longer existing hold is kept.
    pub fn hold_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.lock();
        if state.hold_until.is_none_or(|current| current < until) {
            state.hold_until = Some(until);
        }
    }

    /// Whether this month's token budget is exhausted.
    pub fn is_over_budget(&self) -> bool {
        let mut state = self.lock();
        state.roll_month();
        state.monthly_tokens_used >= self.config.monthly_token_budget
    }

    /// Account one completed call and its token usage.
    pub fn record(&self, tokens: u64) {
        let now = Instant::now();
        let mut state = self.lock();
        state.roll_month();
        state.requests.push_back(now);
        state.tokens.push_back((now, tokens));
        state.tokens_in_window = state.tokens_in_window.saturating_add(tokens);
        state.monthly_tokens_used = state.monthly_tokens_used.saturating_add(tokens);
    }

    /// Calls recorded in the trailing window.
    pub fn requests_in_window(&self) -> usize {
        let mut state = self.lock();
        state.prune(Instant::now());
        state.requests.len()
    }

    /// Tokens recorded in the trailing window.
    pub fn tokens_in_window(&self) -> u64 {
        let mut state = self.lock();
        state.prune(Instant::now());
        state.tokens_in_window
    }

    /// Tokens recorded so far this month.
    pub fn monthly_tokens_used(&self) -> u64 {
        let mut state = self.lock();
        state.roll_month();
        state.monthly_tokens_used
    }

    /// Reset the monthly counter (e.g. after a manual budget top-up).
    pub fn reset_monthly(&self) {
        self.lock().monthly_tokens_used = 0;
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }
}

impl Default for RateBudgetGate {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_gate_allows() {
        let gate = RateBudgetGate::default();
        assert!(gate.allow());
        assert_eq!(gate.requests_in_window(), 0);
    }

    #[test]
    fn token_window_limit_denies() {
        let gate = RateBudgetGate::new(BudgetConfig::new().max_tokens_per_minute(100));
        gate.record(60);
        assert!(gate.allow());
        gate.record(40);
        assert!(gate.is_rate_limited());
        assert!(!gate.allow());
    }

    #[test]
    fn monthly_budget_denies_and_resets() {
        let gate = RateBudgetGate::new(BudgetConfig::new().monthly_token_budget(50));
        gate.record(50);
        assert!(gate.is_over_budget());
        assert!(!gate.allow());

        gate.reset_monthly();
        assert!(!gate.is_over_budget());
        assert_eq!(gate.monthly_tokens_used(), 0);
    }
}
