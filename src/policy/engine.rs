//! Non-blocking reasoning-informed policy.
//!
//! [`ReasoningPolicyEngine::compute`] never awaits the reasoning service.
//! On a cache miss it fires one task per quantized bucket and answers with
//! the heuristic; the task's completion handler fills the cache for later
//! reports in the same bucket.
//!
//! ```text
//! compute(metrics)
//!   ├─ cache hit (bucket, < ttl)  → cached decision
//!   ├─ bucket in flight           → heuristic
//!   └─ otherwise                  → mark in flight, submit, heuristic
//!                                     └─ handler: parse, cache, unmark
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use tracing::{debug, info, warn};

use super::heuristic::HeuristicPolicy;
use super::parse::parse_policy_response;
use crate::reasoning::{ReasoningTaskQueue, prompts};
use crate::telemetry;
use crate::types::{PolicyDecision, PolicySource, QuantizedMetricsKey, SystemMetricsSnapshot};

/// Configuration for the decision cache.
///
/// ```rust
/// # use warmpath::policy::PolicyCacheConfig;
/// # use std::time::Duration;
/// let config = PolicyCacheConfig::new().ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct PolicyCacheConfig {
    /// How long a reasoning decision stays valid. Default: 60s.
    pub ttl: Duration,
    /// Maximum number of cached buckets. Default: 10,000.
    pub max_entries: u64,
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 10_000,
        }
    }
}

impl PolicyCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// A reasoning decision cached for one bucket.
#[derive(Debug, Clone)]
pub struct DecisionCacheEntry {
    pub key: QuantizedMetricsKey,
    pub decision: PolicyDecision,
    pub created_at: Instant,
}

type InFlightSet = Arc<Mutex<HashSet<QuantizedMetricsKey>>>;

/// Combines the heuristic with cached, deduplicated reasoning results.
pub struct ReasoningPolicyEngine {
    queue: Arc<ReasoningTaskQueue>,
    cache: Cache<QuantizedMetricsKey, DecisionCacheEntry>,
    in_flight: InFlightSet,
}

impl ReasoningPolicyEngine {
    pub fn new(queue: Arc<ReasoningTaskQueue>, config: &PolicyCacheConfig) -> Self {
        // Expired entries are dropped lazily on lookup.
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self {
            queue,
            cache,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Policy for `metrics`, without blocking on the reasoning service.
    pub fn compute(&self, metrics: &SystemMetricsSnapshot) -> PolicyDecision {
        self.compute_with_source(metrics).0
    }

    /// Like [`compute`](Self::compute), also reporting where the decision
    /// came from.
    pub fn compute_with_source(
        &self,
        metrics: &SystemMetricsSnapshot,
    ) -> (PolicyDecision, PolicySource) {
        let key = metrics.quantize();

        if let Some(entry) = self.cache.get(&key) {
            metrics::counter!(telemetry::POLICY_CACHE_HITS_TOTAL).increment(1);
            return (entry.decision, PolicySource::Reasoning);
        }
        metrics::counter!(telemetry::POLICY_CACHE_MISSES_TOTAL).increment(1);

        let fallback = HeuristicPolicy::compute(metrics.miss_rate);

        {
            let mut in_flight = lock(&self.in_flight);
            if !in_flight.insert(key) {
                debug!(%key, "reasoning already in flight for bucket");
                return (fallback, PolicySource::Heuristic);
            }
            // An answer may have landed between the miss and the mark.
            if let Some(entry) = self.cache.get(&key) {
                in_flight.remove(&key);
                return (entry.decision, PolicySource::Reasoning);
            }
        }

        let in_flight = Arc::clone(&self.in_flight);
        let cache = self.cache.clone();
        let accepted = self
            .queue
            .submit(prompts::policy_prompt(metrics), move |response| {
                // Cache before unmarking; a report in between would resubmit.
                match response.as_deref().map(parse_policy_response) {
                    Some(Some(decision)) => {
                        info!(
                            %key,
                            ttl_seconds = decision.ttl_seconds,
                            admission_threshold = decision.admission_threshold,
                            eviction_priority = decision.eviction_priority,
                            "reasoning policy updated"
                        );
                        cache.insert(
                            key,
                            DecisionCacheEntry {
                                key,
                                decision,
                                created_at: Instant::now(),
                            },
                        );
                    }
                    Some(None) => warn!(%key, "failed to parse reasoning policy"),
                    None => debug!(%key, "no reasoning answer for bucket"),
                }
                lock(&in_flight).remove(&key);
            });

        if accepted {
            debug!(%key, "reasoning update submitted");
        } else {
            warn!(%key, "reasoning submission rejected");
        }

        (fallback, PolicySource::Heuristic)
    }

    /// Cached reasoning decision for the bucket of `metrics`, if still valid.
    pub fn cached_decision(&self, metrics: &SystemMetricsSnapshot) -> Option<DecisionCacheEntry> {
        self.cache.get(&metrics.quantize())
    }

    /// Number of buckets currently awaiting a reasoning answer.
    pub fn in_flight_len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_in_flight(&self, metrics: &SystemMetricsSnapshot) -> bool {
        lock(&self.in_flight).contains(&metrics.quantize())
    }

    /// Drop every cached decision.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn queue(&self) -> &Arc<ReasoningTaskQueue> {
        &self.queue
    }
}

fn lock(set: &InFlightSet) -> std::sync::MutexGuard<'_, HashSet<QuantizedMetricsKey>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}
