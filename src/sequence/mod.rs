//! Cluster-access sequence mining and prefetch rules.
//!
//! [`SequenceMiner::record`] counts `previous → current` cluster
//! transitions per tenant index. [`SequenceMiner::compact`] periodically
//! reduces the counts to one deterministic successor per cluster and
//! publishes the result as an immutable [`PrefetchRuleSet`]; lookups read
//! whichever set was published last and never see a half-built one.
//!
//! Memory is bounded twice: at most `max_tenants` tenant indexes and at
//! most `max_clusters_per_tenant` source clusters per index. Inserting past
//! either limit first evicts the oldest 10% (at least one) in insertion
//! order.

pub mod bounded;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::telemetry;
use crate::types::TenantIndexKey;

pub use bounded::InsertionOrderedMap;

/// Returned by [`SequenceMiner::lookup`] when no rule exists.
pub const NO_PREDICTION: i64 = -1;

/// Published rules: tenant index → current cluster → predicted next cluster.
pub type PrefetchRuleSet = HashMap<TenantIndexKey, HashMap<i64, i64>>;

/// One `current → next` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PrefetchRule {
    pub current_cluster_id: i64,
    pub next_cluster_id: i64,
}

/// Configuration for [`SequenceMiner`].
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Maximum tracked tenant indexes. Default: 10,000.
    pub max_tenants: usize,
    /// Maximum tracked source clusters per tenant index. Default: 1,000.
    pub max_clusters_per_tenant: usize,
    /// Minimum transition count for a rule. Default: 3.
    pub min_support: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_tenants: 10_000,
            max_clusters_per_tenant: 1_000,
            min_support: 3,
        }
    }
}

impl SequenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_tenants(mut self, n: usize) -> Self {
        self.max_tenants = n.max(1);
        self
    }

    pub fn max_clusters_per_tenant(mut self, n: usize) -> Self {
        self.max_clusters_per_tenant = n.max(1);
        self
    }

    pub fn min_support(mut self, n: u64) -> Self {
        self.min_support = n;
        self
    }
}

/// Successor counts for one source cluster.
///
/// Counts only grow while the cluster is tracked, so the leader can be
/// maintained on insert and compaction never rescans the counts.
#[derive(Debug, Default)]
struct Successors {
    counts: HashMap<i64, u64>,
    /// Most frequent successor and its count; ties go to the smaller id.
    leader: Option<(i64, u64)>,
}

impl Successors {
    fn observe(&mut self, next: i64) {
        let count = self.counts.entry(next).or_insert(0);
        *count += 1;
        let count = *count;
        let leads = match self.leader {
            None => true,
            Some((best, best_count)) => count > best_count || (count == best_count && next < best),
        };
        if leads {
            self.leader = Some((next, count));
        }
    }
}

#[derive(Debug, Default)]
struct TenantTransitions {
    last_cluster: Option<i64>,
    /// current cluster → successor counts
    clusters: InsertionOrderedMap<i64, Successors>,
}

type TransitionTable = InsertionOrderedMap<TenantIndexKey, TenantTransitions>;

/// Records access transitions and serves compacted prefetch rules.
pub struct SequenceMiner {
    config: SequenceConfig,
    transitions: Mutex<TransitionTable>,
    rules: RwLock<Arc<PrefetchRuleSet>>,
}

impl SequenceMiner {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            transitions: Mutex::new(InsertionOrderedMap::new()),
            rules: RwLock::new(Arc::new(PrefetchRuleSet::new())),
        }
    }

    fn table(&self) -> MutexGuard<'_, TransitionTable> {
        self.transitions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an access to `cluster_id`, counting the transition from the
    /// previously recorded cluster when it differs.
    pub fn record(&self, key: &TenantIndexKey, cluster_id: i64) {
        let mut table = self.table();
        self.record_locked(&mut table, key, cluster_id);
    }

    /// Record a batch of accesses in order.
    pub fn record_sequence(&self, key: &TenantIndexKey, cluster_ids: &[i64]) {
        let mut table = self.table();
        for &cluster_id in cluster_ids {
            self.record_locked(&mut table, key, cluster_id);
        }
    }

    fn record_locked(&self, table: &mut TransitionTable, key: &TenantIndexKey, cluster_id: i64) {
        if !table.contains_key(key) && table.len() >= self.config.max_tenants {
            let evicted = table.prune();
            debug!(evicted, "tenant transition table full, pruned oldest tenant indexes");
        }
        let tenant = table.get_or_insert_with(key.clone(), TenantTransitions::default);

        if let Some(last) = tenant.last_cluster.filter(|&last| last != cluster_id) {
            if !tenant.clusters.contains_key(&last)
                && tenant.clusters.len() >= self.config.max_clusters_per_tenant
            {
                let evicted = tenant.clusters.prune();
                debug!(%key, evicted, "cluster transition table full, pruned oldest clusters");
            }
            tenant
                .clusters
                .get_or_insert_with(last, Successors::default)
                .observe(cluster_id);
        }
        tenant.last_cluster = Some(cluster_id);
    }

    /// Rebuild and publish the rule set. Returns the number of rules.
    ///
    /// For each source cluster the most frequent successor wins (ties go to
    /// the smallest cluster id) and is kept only with at least
    /// `min_support` observations.
    ///
    /// The transition lock is held only to copy out each cluster's leader;
    /// the rule maps are built after it is released.
    pub fn compact(&self) -> usize {
        let min_support = self.config.min_support;
        let leaders: Vec<(TenantIndexKey, Vec<(i64, i64)>)> = {
            let table = self.table();
            table
                .iter()
                .map(|(key, tenant)| {
                    let pairs = tenant
                        .clusters
                        .iter()
                        .filter_map(|(&current, successors)| match successors.leader {
                            Some((next, count)) if count >= min_support => Some((current, next)),
                            _ => None,
                        })
                        .collect();
                    (key.clone(), pairs)
                })
                .collect()
        };

        let mut rules = PrefetchRuleSet::new();
        let mut total = 0usize;
        for (key, pairs) in leaders {
            if !pairs.is_empty() {
                total += pairs.len();
                rules.insert(key, pairs.into_iter().collect());
            }
        }

        let indexes = rules.len();
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rules);
        metrics::gauge!(telemetry::PREFETCH_RULES).set(total as f64);
        info!(indexes, rules = total, "prefetch rules compacted");
        total
    }

    /// Predicted next cluster, or [`NO_PREDICTION`].
    pub fn lookup(&self, key: &TenantIndexKey, current_cluster_id: i64) -> i64 {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .and_then(|rules| rules.get(&current_cluster_id).copied())
            .unwrap_or(NO_PREDICTION)
    }

    /// All published rules for one tenant index, ordered by source cluster.
    pub fn rules_for(&self, key: &TenantIndexKey) -> Vec<PrefetchRule> {
        let mut rules: Vec<PrefetchRule> = self
            .snapshot()
            .get(key)
            .map(|rules| {
                rules
                    .iter()
                    .map(|(&current, &next)| PrefetchRule {
                        current_cluster_id: current,
                        next_cluster_id: next,
                    })
                    .collect()
            })
            .unwrap_or_default();
        rules.sort();
        rules
    }

    /// The most recently published rule set.
    pub fn snapshot(&self) -> Arc<PrefetchRuleSet> {
        Arc::clone(&self.rules.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Tenant indexes currently tracked.
    pub fn tenant_count(&self) -> usize {
        self.table().len()
    }

    /// Source clusters tracked for one tenant index.
    pub fn cluster_count(&self, key: &TenantIndexKey) -> usize {
        self.table().get(key).map_or(0, |t| t.clusters.len())
    }

    /// Observed count of `current → next`.
    pub fn transition_count(&self, key: &TenantIndexKey, current: i64, next: i64) -> u64 {
        self.table()
            .get(key)
            .and_then(|t| t.clusters.get(&current))
            .and_then(|successors| successors.counts.get(&next).copied())
            .unwrap_or(0)
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Run [`compact`](Self::compact) every `interval` on the tokio runtime.
    ///
    /// The first compaction happens one full interval after spawning.
    pub fn spawn_compaction(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.compact();
            }
        })
    }
}

impl Default for SequenceMiner {
    fn default() -> Self {
        Self::new(SequenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TenantIndexKey {
        TenantIndexKey::new("tenant", "index")
    }

    #[test]
    fn repeated_cluster_is_not_a_transition() {
        let miner = SequenceMiner::default();
        miner.record_sequence(&key(), &[1, 1, 1, 2]);
        assert_eq!(miner.transition_count(&key(), 1, 1), 0);
        assert_eq!(miner.transition_count(&key(), 1, 2), 1);
    }

    #[test]
    fn ties_prefer_smallest_successor() {
        let miner = SequenceMiner::default();
        for _ in 0..3 {
            miner.record_sequence(&key(), &[1, 9, 1, 4]);
        }
        assert_eq!(miner.transition_count(&key(), 1, 9), 3);
        assert_eq!(miner.transition_count(&key(), 1, 4), 3);
        miner.compact();
        assert_eq!(miner.lookup(&key(), 1), 4);
    }

    #[test]
    fn leader_follows_counts() {
        let mut successors = Successors::default();
        successors.observe(7);
        assert_eq!(successors.leader, Some((7, 1)));
        successors.observe(3);
        assert_eq!(successors.leader, Some((3, 1)), "tie goes to the smaller id");
        successors.observe(7);
        successors.observe(7);
        assert_eq!(successors.leader, Some((7, 3)));
        successors.observe(3);
        assert_eq!(successors.leader, Some((7, 3)));
    }

    #[test]
    fn lookup_before_compaction_is_empty() {
        let miner = SequenceMiner::default();
        for _ in 0..5 {
            miner.record_sequence(&key(), &[1, 2]);
        }
        assert_eq!(miner.lookup(&key(), 1), NO_PREDICTION);
    }
}
