//! Composition root: one call per report type.
//!
//! ```text
//! report_metrics ─► bandit.select_action
//!                ─► ReasoningPolicyEngine (or HeuristicPolicy)
//!                ─► aggressive override if chosen
//!                ─► bandit.update(proxy reward) ─► decision log
//! report_cluster_access ─► SequenceMiner.record ┄┄ compaction ┄┄► prefetch_rules / predict_next
//! list/train/deploy/rollback ─► ModelRegistry
//! ```
//!
//! Nothing here awaits the reasoning service; advisory requests hand their
//! answer to a spawned task.

mod builder;
mod evaluation;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::advisory::{AdvisoryStats, PrefetchDispatcher, TtlAdvisor};
use crate::decision_log::{DecisionRecord, DecisionSink, LoggedDecision};
use crate::policy::{BanditAction, BanditOverride, HeuristicPolicy, ReasoningPolicyEngine};
use crate::reasoning::{QueueStats, ReasoningTaskQueue, prompts};
use crate::registry::{ModelList, ModelRegistry, ModelSlot, RollbackOutcome, TrainJob};
use crate::sequence::{PrefetchRule, SequenceMiner};
use crate::types::{
    IndexPolicy, PolicyDecision, PolicySource, SystemMetricsSnapshot, TenantIndexKey,
};
use crate::{Result, WarmpathError, telemetry};

pub use builder::OrchestratorBuilder;
pub use evaluation::EvaluationReport;
use evaluation::EvaluationTracker;

/// Miss rate the bandit's proxy reward is measured against.
pub const DEFAULT_REWARD_BASELINE: f64 = 0.3;

/// Index build parameters served to every tenant.
pub const DEFAULT_PQ_M: u32 = 16;
pub const DEFAULT_PQ_CONSTRUCTION: u32 = 200;
pub const DEFAULT_PCA_DIMENSION: u32 = 64;

/// Wires the decision components together behind the report API.
pub struct Orchestrator {
    queue: Arc<ReasoningTaskQueue>,
    engine: Option<ReasoningPolicyEngine>,
    bandit: Arc<BanditOverride>,
    bandit_path: Option<PathBuf>,
    sequence: Arc<SequenceMiner>,
    registry: Option<Arc<ModelRegistry>>,
    prefetch: Arc<PrefetchDispatcher>,
    ttl: Arc<TtlAdvisor>,
    decision_log: Arc<dyn DecisionSink>,
    reward_baseline: f64,
    evaluation: Mutex<EvaluationTracker>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Start the reasoning worker. Requires a tokio runtime.
    pub fn start(&self) {
        self.queue.start();
    }

    /// Handle a system-metrics report and return the policy to apply.
    ///
    /// Never blocks on the reasoning service and never fails.
    pub fn report_metrics(&self, tenant_id: &str, metrics: &SystemMetricsSnapshot) -> PolicyDecision {
        let features = BanditOverride::features(metrics);
        let action = self.bandit.select_action(&features);

        let (base, source) = match &self.engine {
            Some(engine) => engine.compute_with_source(metrics),
            None => (HeuristicPolicy::compute(metrics.miss_rate), PolicySource::Heuristic),
        };
        let decision = match action {
            BanditAction::Aggressive => base.with_aggressive_override(),
            BanditAction::Normal => base,
        };

        // Proxy reward: improvement over the baseline miss rate.
        let reward = (self.reward_baseline - metrics.miss_rate).clamp(-1.0, 1.0);
        self.bandit.update(&features, action, reward);

        metrics::counter!(telemetry::POLICY_DECISIONS_TOTAL, "source" => source.as_str())
            .increment(1);
        self.tracker().observe(metrics, action);
        self.decision_log.log(&DecisionRecord::now(
            tenant_id,
            *metrics,
            LoggedDecision::new(&decision, action.as_index()),
        ));

        debug!(
            tenant_id,
            qps = metrics.qps,
            miss_rate = metrics.miss_rate,
            latency_p99_ms = metrics.latency_p99_ms,
            source = source.as_str(),
            bandit_action = action.as_str(),
            ttl_seconds = decision.ttl_seconds,
            admission_threshold = decision.admission_threshold,
            "policy decided"
        );
        decision
    }

    /// Record a batch of cluster accesses, in order.
    pub fn report_cluster_access(&self, tenant_id: &str, index_name: &str, cluster_ids: &[i64]) {
        let key = TenantIndexKey::new(tenant_id, index_name);
        self.sequence.record_sequence(&key, cluster_ids);
    }

    /// Published prefetch rules for one tenant index.
    pub fn prefetch_rules(&self, tenant_id: &str, index_name: &str) -> Vec<PrefetchRule> {
        self.sequence
            .rules_for(&TenantIndexKey::new(tenant_id, index_name))
    }

    /// Predicted next cluster, or [`NO_PREDICTION`](crate::sequence::NO_PREDICTION).
    pub fn predict_next(&self, tenant_id: &str, index_name: &str, current_cluster_id: i64) -> i64 {
        self.sequence
            .lookup(&TenantIndexKey::new(tenant_id, index_name), current_cluster_id)
    }

    /// Index parameters for a tenant, with its model slot.
    pub fn index_policy(&self, tenant_id: &str) -> IndexPolicy {
        let model_slot = self
            .registry
            .as_ref()
            .map_or(ModelSlot::Active, |r| r.slot_for_tenant(tenant_id));
        if model_slot == ModelSlot::Canary {
            debug!(tenant_id, "tenant routed to canary model");
        }
        IndexPolicy {
            pq_m: DEFAULT_PQ_M,
            pq_construction: DEFAULT_PQ_CONSTRUCTION,
            pca_dimension: DEFAULT_PCA_DIMENSION,
            model_slot,
        }
    }

    /// Ask the reasoning service to predict the next cluster and dispatch a
    /// prefetch if it is confident. Returns whether the request was queued.
    pub fn request_prefetch_prediction(
        &self,
        tenant_id: &str,
        index_name: &str,
        history: &[i64],
    ) -> bool {
        let dispatcher = Arc::clone(&self.prefetch);
        let tenant = tenant_id.to_string();
        let index = index_name.to_string();
        self.queue
            .submit(prompts::prefetch_prompt(history), move |response| {
                let Some(text) = response else { return };
                spawn_advisory("prefetch", async move {
                    dispatcher.dispatch(&tenant, &index, &text).await;
                });
            })
    }

    /// Ask the reasoning service for TTL advice on one cluster and record
    /// the resulting override. Returns whether the request was queued.
    pub fn request_ttl_advice(
        &self,
        tenant_id: &str,
        index_name: &str,
        cluster_id: i64,
        access_rate: f64,
        last_update_secs: f64,
    ) -> bool {
        let advisor = Arc::clone(&self.ttl);
        let tenant = tenant_id.to_string();
        let index = index_name.to_string();
        let prompt = prompts::ttl_advice_prompt(cluster_id, access_rate, last_update_secs);
        self.queue.submit(prompt, move |response| {
            let Some(text) = response else { return };
            spawn_advisory("ttl", async move {
                advisor
                    .apply_for_cluster(&tenant, &index, cluster_id, &text)
                    .await;
            });
        })
    }

    /// Pending TTL override for a cluster (`0` = evict now).
    pub fn ttl_override(&self, tenant_id: &str, index_name: &str, cluster_id: i64) -> Option<u32> {
        self.ttl.get_override(tenant_id, index_name, cluster_id)
    }

    fn registry(&self) -> Result<&Arc<ModelRegistry>> {
        self.registry
            .as_ref()
            .ok_or_else(|| WarmpathError::Configuration("model registry not configured".into()))
    }

    pub fn list_models(&self) -> Result<ModelList> {
        self.registry()?.list()
    }

    /// Start a training run; returns once the version id is assigned.
    pub fn train_model(&self, dataset: Option<&Path>) -> Result<TrainJob> {
        Ok(self.registry()?.train(dataset))
    }

    pub fn deploy_model(&self, version: &str, canary: bool, tenants: &[String]) -> Result<()> {
        self.registry()?.deploy(version, canary, tenants)
    }

    pub fn rollback_model(&self, canary_only: bool) -> Result<RollbackOutcome> {
        self.registry()?.rollback(canary_only)
    }

    pub fn evaluations(&self) -> EvaluationReport {
        let (active_version, canary_version) = match &self.registry {
            Some(r) => {
                let state = r.state();
                (state.active_version, state.canary_version)
            }
            None => (None, None),
        };
        let tracker = self.tracker();
        EvaluationReport {
            reports: tracker.reports(),
            observed_hit_rate: tracker.observed_hit_rate(),
            p99_improvement: tracker.p99_improvement(),
            bandit_epsilon: self.bandit.epsilon(),
            aggressive_ratio: tracker.aggressive_ratio(),
            active_version,
            canary_version,
        }
    }

    /// Compact prefetch rules every `interval` in the background.
    pub fn spawn_compaction(&self, interval: Duration) -> JoinHandle<()> {
        Arc::clone(&self.sequence).spawn_compaction(interval)
    }

    /// Stop the reasoning worker and persist the bandit.
    pub async fn shutdown(&self) {
        self.queue.stop().await;
        if let Some(path) = &self.bandit_path {
            match self.bandit.save(path) {
                Ok(()) => info!(path = %path.display(), "bandit model saved"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to save bandit model"),
            }
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn prefetch_stats(&self) -> AdvisoryStats {
        self.prefetch.stats()
    }

    pub fn ttl_stats(&self) -> AdvisoryStats {
        self.ttl.stats()
    }

    pub fn queue(&self) -> &Arc<ReasoningTaskQueue> {
        &self.queue
    }

    pub fn policy_engine(&self) -> Option<&ReasoningPolicyEngine> {
        self.engine.as_ref()
    }

    pub fn bandit(&self) -> &Arc<BanditOverride> {
        &self.bandit
    }

    pub fn sequence(&self) -> &Arc<SequenceMiner> {
        &self.sequence
    }

    pub fn ttl_advisor(&self) -> &Arc<TtlAdvisor> {
        &self.ttl
    }

    pub fn model_registry(&self) -> Option<&Arc<ModelRegistry>> {
        self.registry.as_ref()
    }

    fn tracker(&self) -> MutexGuard<'_, EvaluationTracker> {
        self.evaluation.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Run advisory work off the queue worker.
fn spawn_advisory<F>(kind: &'static str, work: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(work);
        }
        Err(_) => warn!(kind, "no tokio runtime for advisory dispatch"),
    }
}
