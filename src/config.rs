//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.warmpath/config.toml` (user)
//! 3. `/etc/warmpath/config.toml` (system)
//!
//! Every field has a default, so an empty file (or no file, via
//! [`Config::load_or_default`]) is a valid configuration.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.warmpath/secrets.toml` (user, must be 0600)
//! 2. `/etc/warmpath/secrets.toml` (system, must be 0600)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::policy::{BanditConfig, PolicyCacheConfig};
use crate::reasoning::{BudgetConfig, QueueConfig};
use crate::registry::RegistryConfig;
use crate::sequence::SequenceConfig;
use crate::{Result, WarmpathError};

/// Environment variable consulted when no secrets file carries a key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reasoning: ReasoningSection,
    pub policy: PolicySection,
    pub sequence: SequenceSection,
    pub bandit: BanditSection,
    pub models: ModelsSection,
    pub decision_log: DecisionLogSection,
}

/// `[reasoning]`: external service, budget and queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningSection {
    /// Use the reasoning service at all (default: true). Without an API key
    /// the service is disabled regardless.
    pub enabled: bool,
    /// Gemini model name (default: gemini-pro).
    pub model: String,
    /// Override the API base URL.
    pub base_url: Option<String>,
    pub max_requests_per_minute: u32,
    pub max_tokens_per_minute: u64,
    pub monthly_token_budget: u64,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        let budget = BudgetConfig::default();
        let queue = QueueConfig::default();
        Self {
            enabled: true,
            model: crate::reasoning::gemini::DEFAULT_MODEL.to_string(),
            base_url: None,
            max_requests_per_minute: budget.max_requests_per_minute,
            max_tokens_per_minute: budget.max_tokens_per_minute,
            monthly_token_budget: budget.monthly_token_budget,
            queue_capacity: queue.capacity,
            max_retries: queue.max_retries,
            poll_interval_ms: queue.poll_interval.as_millis() as u64,
            retry_backoff_ms: queue.retry_backoff.as_millis() as u64,
            shutdown_timeout_secs: queue.shutdown_timeout.as_secs(),
        }
    }
}

impl ReasoningSection {
    pub fn budget_config(&self) -> BudgetConfig {
        BudgetConfig::new()
            .max_requests_per_minute(self.max_requests_per_minute)
            .max_tokens_per_minute(self.max_tokens_per_minute)
            .monthly_token_budget(self.monthly_token_budget)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new()
            .capacity(self.queue_capacity)
            .max_retries(self.max_retries)
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .retry_backoff(Duration::from_millis(self.retry_backoff_ms))
            .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
    }
}

/// `[policy]`: decision cache and bandit reward.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// Miss rate treated as neutral by the bandit reward (default: 0.3).
    pub reward_baseline: f64,
}

impl Default for PolicySection {
    fn default() -> Self {
        let cache = PolicyCacheConfig::default();
        Self {
            cache_ttl_secs: cache.ttl.as_secs(),
            cache_max_entries: cache.max_entries,
            reward_baseline: crate::orchestrator::DEFAULT_REWARD_BASELINE,
        }
    }
}

impl PolicySection {
    pub fn cache_config(&self) -> PolicyCacheConfig {
        PolicyCacheConfig::new()
            .ttl(Duration::from_secs(self.cache_ttl_secs))
            .max_entries(self.cache_max_entries)
    }
}

/// `[sequence]`: transition table bounds and compaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceSection {
    pub max_tenants: usize,
    pub max_clusters_per_tenant: usize,
    pub min_support: u64,
    pub compaction_interval_secs: u64,
}

impl Default for SequenceSection {
    fn default() -> Self {
        let seq = SequenceConfig::default();
        Self {
            max_tenants: seq.max_tenants,
            max_clusters_per_tenant: seq.max_clusters_per_tenant,
            min_support: seq.min_support,
            compaction_interval_secs: 60,
        }
    }
}

impl SequenceSection {
    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig::new()
            .max_tenants(self.max_tenants)
            .max_clusters_per_tenant(self.max_clusters_per_tenant)
            .min_support(self.min_support)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs.max(1))
    }
}

/// `[bandit]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BanditSection {
    pub epsilon: f64,
    pub learning_rate: f64,
    pub l2: f64,
    pub seed: Option<u64>,
    /// Where weights are persisted (default: models/bandit.json).
    pub model_path: PathBuf,
}

impl Default for BanditSection {
    fn default() -> Self {
        let bandit = BanditConfig::default();
        Self {
            epsilon: bandit.epsilon,
            learning_rate: bandit.learning_rate,
            l2: bandit.l2,
            seed: None,
            model_path: PathBuf::from("models/bandit.json"),
        }
    }
}

impl BanditSection {
    pub fn bandit_config(&self) -> BanditConfig {
        let config = BanditConfig::new()
            .epsilon(self.epsilon)
            .learning_rate(self.learning_rate)
            .l2(self.l2);
        match self.seed {
            Some(seed) => config.seed(seed),
            None => config,
        }
    }
}

/// `[models]`: registry layout and trainer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub models_dir: PathBuf,
    /// Default: `<models_dir>/staging`.
    pub staging_dir: Option<PathBuf>,
    pub artifact_extension: String,
    /// Interpreter for the training script (default: python3).
    pub trainer_program: String,
    /// Training script (default: train_model.py).
    pub trainer_script: String,
    pub default_dataset: PathBuf,
}

impl Default for ModelsSection {
    fn default() -> Self {
        let registry = RegistryConfig::default();
        Self {
            models_dir: registry.models_dir,
            staging_dir: None,
            artifact_extension: registry.artifact_extension,
            trainer_program: "python3".to_string(),
            trainer_script: "train_model.py".to_string(),
            default_dataset: registry.default_dataset,
        }
    }
}

impl ModelsSection {
    pub fn registry_config(&self) -> RegistryConfig {
        let config = RegistryConfig::new(&self.models_dir)
            .artifact_extension(&self.artifact_extension)
            .default_dataset(&self.default_dataset);
        match &self.staging_dir {
            Some(dir) => config.staging_dir(dir),
            None => config,
        }
    }
}

/// `[decision_log]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionLogSection {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for DecisionLogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("logs/query_log.jsonl"),
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.warmpath/config.toml`
    /// 3. `/etc/warmpath/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?
            .ok_or_else(|| {
                WarmpathError::Configuration(
                    "No config file found. Create ~/.warmpath/config.toml or /etc/warmpath/config.toml"
                        .to_string(),
                )
            })?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no file
    /// exists at the standard locations. An explicit path must exist.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => {
                info!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WarmpathError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            WarmpathError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            WarmpathError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(WarmpathError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".warmpath").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/warmpath/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

/// Secrets (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub gemini: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the key may come from the
    /// environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".warmpath").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/warmpath/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a specific secrets file (permission-checked).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            WarmpathError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            WarmpathError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            WarmpathError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(WarmpathError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Gemini API key, falling back to `GEMINI_API_KEY`.
    pub fn gemini_api_key(&self) -> Option<String> {
        self.gemini
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(GEMINI_API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}
