//! Epsilon-greedy contextual bandit over two arms.
//!
//! Arm 0 ([`BanditAction::Normal`]) keeps the chosen policy; arm 1
//! ([`BanditAction::Aggressive`]) applies
//! [`PolicyDecision::with_aggressive_override`](crate::types::PolicyDecision::with_aggressive_override).
//!
//! The exploit path is an online logistic regression over standardised
//! features, trained one SGD step per feedback. Feedback is reduced to a
//! classification label: a positive reward confirms the action taken, any
//! other reward votes for the opposite arm.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::SystemMetricsSnapshot;
use crate::{Result, telemetry};

/// Number of features fed to the classifier.
pub const FEATURE_DIM: usize = 4;

/// `[qps, miss_rate, latency_p99_ms, cpu_utilization]`
pub type FeatureVector = [f64; FEATURE_DIM];

/// The two bandit arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditAction {
    Normal,
    Aggressive,
}

impl BanditAction {
    pub fn as_index(self) -> u8 {
        match self {
            BanditAction::Normal => 0,
            BanditAction::Aggressive => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(BanditAction::Normal),
            1 => Some(BanditAction::Aggressive),
            _ => None,
        }
    }

    pub fn complement(self) -> Self {
        match self {
            BanditAction::Normal => BanditAction::Aggressive,
            BanditAction::Aggressive => BanditAction::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BanditAction::Normal => "normal",
            BanditAction::Aggressive => "aggressive",
        }
    }
}

/// Configuration for [`BanditOverride`].
#[derive(Debug, Clone)]
pub struct BanditConfig {
    /// Exploration probability. Default: 0.1.
    pub epsilon: f64,
    /// SGD step size. Default: 0.05.
    pub learning_rate: f64,
    /// L2 penalty. Default: 1e-4.
    pub l2: f64,
    /// Fixed RNG seed for reproducible exploration. Default: OS entropy.
    pub seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            learning_rate: 0.05,
            l2: 1e-4,
            seed: None,
        }
    }
}

impl BanditConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon.clamp(0.0, 1.0);
        self
    }

    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn l2(mut self, l2: f64) -> Self {
        self.l2 = l2;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Running mean/variance per feature (Welford).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FeatureScaler {
    count: u64,
    mean: FeatureVector,
    m2: FeatureVector,
}

impl FeatureScaler {
    fn observe(&mut self, x: &FeatureVector) {
        self.count += 1;
        let n = self.count as f64;
        for i in 0..FEATURE_DIM {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (x[i] - self.mean[i]);
        }
    }

    fn transform(&self, x: &FeatureVector) -> FeatureVector {
        let mut z = [0.0; FEATURE_DIM];
        if self.count < 2 {
            return z;
        }
        let n = self.count as f64;
        for i in 0..FEATURE_DIM {
            let std = (self.m2[i] / n).sqrt();
            if std > 1e-12 {
                z[i] = (x[i] - self.mean[i]) / std;
            }
        }
        z
    }
}

/// Persisted classifier state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LinearClassifier {
    weights: FeatureVector,
    bias: f64,
    scaler: FeatureScaler,
    steps: u64,
    fitted: bool,
}

impl LinearClassifier {
    fn probability(&self, x: &FeatureVector) -> f64 {
        let z = self.scaler.transform(x);
        let logit = self
            .weights
            .iter()
            .zip(z.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.bias;
        sigmoid(logit)
    }

    fn step(&mut self, x: &FeatureVector, label: f64, lr: f64, l2: f64) {
        self.scaler.observe(x);
        let z = self.scaler.transform(x);
        let p = sigmoid(
            self.weights
                .iter()
                .zip(z.iter())
                .map(|(w, v)| w * v)
                .sum::<f64>()
                + self.bias,
        );
        let grad = p - label;
        for i in 0..FEATURE_DIM {
            self.weights[i] -= lr * (grad * z[i] + l2 * self.weights[i]);
        }
        self.bias -= lr * grad;
        self.steps += 1;
        self.fitted = true;
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Serialize, Deserialize)]
struct BanditSnapshot {
    epsilon: f64,
    decisions: u64,
    classifier: LinearClassifier,
}

struct BanditState {
    classifier: LinearClassifier,
    rng: StdRng,
    decisions: u64,
    aggressive: u64,
}

/// Online normal-vs-aggressive override applied after the base policy.
pub struct BanditOverride {
    config: BanditConfig,
    state: Mutex<BanditState>,
}

impl BanditOverride {
    pub fn new(config: BanditConfig) -> Self {
        Self::from_parts(config, LinearClassifier::default(), 0)
    }

    fn from_parts(config: BanditConfig, classifier: LinearClassifier, decisions: u64) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            state: Mutex::new(BanditState {
                classifier,
                rng,
                decisions,
                aggressive: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BanditState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Feature vector for a metrics report.
    pub fn features(metrics: &SystemMetricsSnapshot) -> FeatureVector {
        [
            metrics.qps,
            metrics.miss_rate,
            metrics.latency_p99_ms,
            metrics.cpu_utilization,
        ]
    }

    /// Pick an arm: random with probability ε or while unfitted, otherwise
    /// the classifier's prediction.
    pub fn select_action(&self, features: &FeatureVector) -> BanditAction {
        let mut state = self.lock();
        state.decisions += 1;

        let explore = state.rng.random::<f64>() < self.config.epsilon;
        let action = if explore || !state.classifier.fitted {
            random_action(&mut state.rng)
        } else {
            let p = state.classifier.probability(features);
            if p.is_finite() {
                if p >= 0.5 {
                    BanditAction::Aggressive
                } else {
                    BanditAction::Normal
                }
            } else {
                warn!("bandit prediction not finite, choosing randomly");
                random_action(&mut state.rng)
            }
        };

        if action == BanditAction::Aggressive {
            state.aggressive += 1;
        }
        metrics::counter!(telemetry::BANDIT_ACTIONS_TOTAL, "action" => action.as_str())
            .increment(1);
        action
    }

    /// One training step from feedback on `action`.
    pub fn update(&self, features: &FeatureVector, action: BanditAction, reward: f64) {
        if !reward.is_finite() || features.iter().any(|v| !v.is_finite()) {
            warn!(reward, "skipping bandit update with non-finite input");
            return;
        }
        let label = if reward > 0.0 { action } else { action.complement() };
        let mut state = self.lock();
        state.classifier.step(
            features,
            label.as_index() as f64,
            self.config.learning_rate,
            self.config.l2,
        );
        debug!(
            action = action.as_str(),
            label = label.as_str(),
            reward,
            steps = state.classifier.steps,
            "bandit updated"
        );
    }

    /// Probability the classifier assigns to the aggressive arm, or `None`
    /// before the first update.
    pub fn predict_proba(&self, features: &FeatureVector) -> Option<f64> {
        let state = self.lock();
        state
            .classifier
            .fitted
            .then(|| state.classifier.probability(features))
    }

    pub fn is_fitted(&self) -> bool {
        self.lock().classifier.fitted
    }

    pub fn epsilon(&self) -> f64 {
        self.config.epsilon
    }

    /// Decisions made since construction (or restored from disk).
    pub fn decisions(&self) -> u64 {
        self.lock().decisions
    }

    /// Fraction of decisions this process took the aggressive arm.
    pub fn aggressive_ratio(&self) -> f64 {
        let state = self.lock();
        if state.decisions == 0 {
            0.0
        } else {
            state.aggressive as f64 / state.decisions as f64
        }
    }

    /// Training steps applied so far.
    pub fn steps(&self) -> u64 {
        self.lock().classifier.steps
    }

    /// Persist the classifier as JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let state = self.lock();
            BanditSnapshot {
                epsilon: self.config.epsilon,
                decisions: state.decisions,
                classifier: state.classifier.clone(),
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "bandit model saved");
        Ok(())
    }

    /// Restore from `path`. The configured ε wins over the stored one.
    pub fn load(path: &Path, config: BanditConfig) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: BanditSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.epsilon != config.epsilon {
            debug!(
                stored = snapshot.epsilon,
                configured = config.epsilon,
                "bandit epsilon changed since last save"
            );
        }
        Ok(Self::from_parts(config, snapshot.classifier, snapshot.decisions))
    }

    /// Restore from `path`, or start fresh if it is missing or unreadable.
    pub fn load_or_new(path: &Path, config: BanditConfig) -> Self {
        if !path.exists() {
            return Self::new(config);
        }
        match Self::load(path, config.clone()) {
            Ok(bandit) => {
                info!(path = %path.display(), "loaded bandit model");
                bandit
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load bandit model, starting fresh");
                Self::new(config)
            }
        }
    }
}

impl Default for BanditOverride {
    fn default() -> Self {
        Self::new(BanditConfig::default())
    }
}

fn random_action(rng: &mut StdRng) -> BanditAction {
    if rng.random_bool(0.5) {
        BanditAction::Aggressive
    } else {
        BanditAction::Normal
    }
}
