//! Telemetry metric name constants.
//!
//! Centralised metric names for warmpath operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `warmpath_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status`: reasoning call outcome: "ok", "error", "rate_limited",
//!   "budget_exceeded", "rejected", "dropped"
//! - `direction`: token direction: "input" or "output"
//! - `source`: decision origin: "heuristic" or "reasoning"
//! - `action`: bandit arm: "normal" or "aggressive"
//! - `kind` / `outcome`: advisory type and what happened to it

/// Reasoning-service tasks by terminal outcome.
///
/// Labels: `status`.
pub const REASONING_REQUESTS_TOTAL: &str = "warmpath_reasoning_requests_total";

/// Reasoning-service call latency in seconds.
pub const REASONING_LATENCY_SECONDS: &str = "warmpath_reasoning_latency_seconds";

/// Estimated tokens consumed by reasoning calls.
///
/// Labels: `direction` ("input" | "output").
pub const REASONING_TOKENS_TOTAL: &str = "warmpath_reasoning_tokens_total";

/// Current number of tasks waiting in the reasoning queue.
pub const REASONING_QUEUE_DEPTH: &str = "warmpath_reasoning_queue_depth";

/// Decision cache hits in the reasoning policy engine.
pub const POLICY_CACHE_HITS_TOTAL: &str = "warmpath_policy_cache_hits_total";

/// Decision cache misses in the reasoning policy engine.
pub const POLICY_CACHE_MISSES_TOTAL: &str = "warmpath_policy_cache_misses_total";

/// Policy decisions served.
///
/// Labels: `source` ("heuristic" | "reasoning").
pub const POLICY_DECISIONS_TOTAL: &str = "warmpath_policy_decisions_total";

/// Bandit arm selections.
///
/// Labels: `action` ("normal" | "aggressive").
pub const BANDIT_ACTIONS_TOTAL: &str = "warmpath_bandit_actions_total";

/// Number of prefetch rules in the most recently published rule set.
pub const PREFETCH_RULES: &str = "warmpath_prefetch_rules";

/// Advisory outputs handled.
///
/// Labels: `kind` ("prefetch" | "ttl"), `outcome` ("applied" | "ignored" | "parse_error").
pub const ADVISORY_TOTAL: &str = "warmpath_advisory_total";
