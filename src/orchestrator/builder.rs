//! Builder for configuring orchestrator instances

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::{DEFAULT_REWARD_BASELINE, Orchestrator};
use crate::Result;
use crate::advisory::{PrefetchDispatcher, PrefetchSink, TtlAdvisor, TtlUpdateCallback};
use crate::config::{Config, Secrets};
use crate::decision_log::{DecisionSink, JsonlDecisionLog, NullDecisionSink};
use crate::policy::{BanditConfig, BanditOverride, PolicyCacheConfig, ReasoningPolicyEngine};
use crate::reasoning::{
    BudgetConfig, GeminiClient, QueueConfig, RateBudgetGate, ReasoningService, ReasoningTaskQueue,
};
use crate::registry::{CommandTrainer, ModelRegistry, ModelTrainer, RegistryConfig};
use crate::sequence::{SequenceConfig, SequenceMiner};

/// Builder for [`Orchestrator`].
///
/// ```rust,no_run
/// # use warmpath::Orchestrator;
/// # fn main() -> warmpath::Result<()> {
/// let orchestrator = Orchestrator::builder()
///     .gemini("your-api-key")
///     .bandit_path("models/bandit.json")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    service: Option<Arc<dyn ReasoningService>>,
    gate: Option<Arc<RateBudgetGate>>,
    budget: BudgetConfig,
    queue: QueueConfig,
    policy_cache: PolicyCacheConfig,
    bandit: BanditConfig,
    bandit_path: Option<PathBuf>,
    sequence: SequenceConfig,
    registry: Option<(RegistryConfig, Arc<dyn ModelTrainer>)>,
    prefetch_sink: Option<Arc<dyn PrefetchSink>>,
    ttl_callback: Option<TtlUpdateCallback>,
    decision_sink: Option<Arc<dyn DecisionSink>>,
    reward_baseline: f64,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            service: None,
            gate: None,
            budget: BudgetConfig::default(),
            queue: QueueConfig::default(),
            policy_cache: PolicyCacheConfig::default(),
            bandit: BanditConfig::default(),
            bandit_path: None,
            sequence: SequenceConfig::default(),
            registry: None,
            prefetch_sink: None,
            ttl_callback: None,
            decision_sink: None,
            reward_baseline: DEFAULT_REWARD_BASELINE,
        }
    }

    /// Builder pre-populated from configuration files.
    ///
    /// The reasoning service is enabled only when `[reasoning] enabled` is
    /// set and an API key is available.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let mut builder = Self::new()
            .budget(config.reasoning.budget_config())
            .queue(config.reasoning.queue_config())
            .policy_cache(config.policy.cache_config())
            .reward_baseline(config.policy.reward_baseline)
            .bandit(config.bandit.bandit_config())
            .bandit_path(&config.bandit.model_path)
            .sequence(config.sequence.sequence_config());

        if config.reasoning.enabled {
            match secrets.gemini_api_key() {
                Some(key) => {
                    let client = match &config.reasoning.base_url {
                        Some(url) => GeminiClient::with_base_url(key, url),
                        None => GeminiClient::new(key),
                    }
                    .model(&config.reasoning.model);
                    info!(model = %config.reasoning.model, "reasoning service enabled");
                    builder = builder.reasoning_service(Arc::new(client));
                }
                None => warn!("no Gemini API key found, reasoning policy disabled"),
            }
        } else {
            info!("reasoning policy disabled by configuration");
        }

        if config.decision_log.enabled {
            let log = JsonlDecisionLog::open(&config.decision_log.path)?;
            builder = builder.decision_sink(Arc::new(log));
        }

        let trainer = CommandTrainer::new(&config.models.trainer_program)
            .arg(&config.models.trainer_script);
        builder = builder.registry(config.models.registry_config(), Arc::new(trainer));

        Ok(builder)
    }

    /// Use a custom reasoning service.
    pub fn reasoning_service(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Use Gemini as the reasoning service.
    pub fn gemini(self, api_key: impl Into<String>) -> Self {
        self.reasoning_service(Arc::new(GeminiClient::new(api_key)))
    }

    /// Share an existing gate (e.g. with a health exporter). Overrides
    /// [`budget`](Self::budget).
    pub fn gate(mut self, gate: Arc<RateBudgetGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn budget(mut self, config: BudgetConfig) -> Self {
        self.budget = config;
        self
    }

    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    pub fn policy_cache(mut self, config: PolicyCacheConfig) -> Self {
        self.policy_cache = config;
        self
    }

    pub fn bandit(mut self, config: BanditConfig) -> Self {
        self.bandit = config;
        self
    }

    /// Restore the bandit from, and save it to, this file.
    pub fn bandit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bandit_path = Some(path.into());
        self
    }

    pub fn sequence(mut self, config: SequenceConfig) -> Self {
        self.sequence = config;
        self
    }

    /// Enable model lifecycle calls.
    pub fn registry(mut self, config: RegistryConfig, trainer: Arc<dyn ModelTrainer>) -> Self {
        self.registry = Some((config, trainer));
        self
    }

    pub fn prefetch_sink(mut self, sink: Arc<dyn PrefetchSink>) -> Self {
        self.prefetch_sink = Some(sink);
        self
    }

    pub fn ttl_callback(mut self, callback: TtlUpdateCallback) -> Self {
        self.ttl_callback = Some(callback);
        self
    }

    pub fn decision_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.decision_sink = Some(sink);
        self
    }

    /// Miss rate the bandit reward is measured against (default: 0.3).
    pub fn reward_baseline(mut self, baseline: f64) -> Self {
        self.reward_baseline = baseline;
        self
    }

    /// Build the orchestrator. Call [`Orchestrator::start`] from within a
    /// tokio runtime to begin processing reasoning tasks.
    pub fn build(self) -> Result<Orchestrator> {
        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(RateBudgetGate::new(self.budget)));
        let reasoning_enabled = self.service.is_some();
        let queue = Arc::new(ReasoningTaskQueue::new(self.service, gate, self.queue));
        let engine = reasoning_enabled
            .then(|| ReasoningPolicyEngine::new(Arc::clone(&queue), &self.policy_cache));

        let bandit = match &self.bandit_path {
            Some(path) => BanditOverride::load_or_new(path, self.bandit),
            None => BanditOverride::new(self.bandit),
        };

        let registry = match self.registry {
            Some((config, trainer)) => Some(Arc::new(ModelRegistry::open(config, trainer)?)),
            None => None,
        };

        Ok(Orchestrator {
            queue,
            engine,
            bandit: Arc::new(bandit),
            bandit_path: self.bandit_path,
            sequence: Arc::new(SequenceMiner::new(self.sequence)),
            registry,
            prefetch: Arc::new(PrefetchDispatcher::new(self.prefetch_sink)),
            ttl: Arc::new(TtlAdvisor::new(self.ttl_callback)),
            decision_log: self
                .decision_sink
                .unwrap_or_else(|| Arc::new(NullDecisionSink)),
            reward_baseline: self.reward_baseline,
            evaluation: Mutex::new(Default::default()),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
