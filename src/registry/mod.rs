//! Model registry: staged artifacts, active/canary slots and rollback.
//!
//! Layout under `models_dir`:
//!
//! ```text
//! models/
//! ├── staging/<version>.onnx   trained artifacts, one per version
//! ├── active.onnx              copy of the active version
//! ├── canary.onnx              copy of the canary version, if any
//! └── state.json               active/canary pointers + canary tenants
//! ```
//!
//! Artifacts are opaque. Mutations (`deploy`, `rollback`) are serialized by
//! one lifecycle lock; reads of the slot pointers (`slot_for_tenant`) only
//! take a short read lock so the hot path never waits on a file copy.

pub mod trainer;

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{Result, WarmpathError};

pub use trainer::{CommandTrainer, ModelTrainer, TrainJob};

const STATE_FILE: &str = "state.json";

/// Version id format (UTC).
pub const VERSION_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Configuration for [`ModelRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Root directory. Default: `models`.
    pub models_dir: PathBuf,
    /// Staged artifacts. Default: `<models_dir>/staging`.
    pub staging_dir: PathBuf,
    /// Artifact file extension. Default: `onnx`.
    pub artifact_extension: String,
    /// Dataset used when `train` is called without one.
    /// Default: `logs/query_log.jsonl`.
    pub default_dataset: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new("models")
    }
}

impl RegistryConfig {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        let models_dir = models_dir.into();
        Self {
            staging_dir: models_dir.join("staging"),
            models_dir,
            artifact_extension: "onnx".to_string(),
            default_dataset: PathBuf::from("logs/query_log.jsonl"),
        }
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn artifact_extension(mut self, ext: impl Into<String>) -> Self {
        self.artifact_extension = ext.into();
        self
    }

    pub fn default_dataset(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_dataset = path.into();
        self
    }

    fn slot_path(&self, slot: ModelSlot) -> PathBuf {
        let name = match slot {
            ModelSlot::Active => "active",
            ModelSlot::Canary => "canary",
        };
        self.models_dir
            .join(format!("{name}.{}", self.artifact_extension))
    }

    fn artifact_path(&self, version: &str) -> PathBuf {
        self.staging_dir
            .join(format!("{version}.{}", self.artifact_extension))
    }
}

/// Which deployed artifact a tenant is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSlot {
    Active,
    Canary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Trained,
    Active,
    Canary,
}

/// One staged artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub status: ModelStatus,
}

/// Result of [`ModelRegistry::list`], newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelList {
    pub models: Vec<ModelVersion>,
    pub active_version: Option<String>,
    pub canary_version: Option<String>,
    pub canary_tenants: Vec<String>,
}

/// Persisted slot pointers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryState {
    pub active_version: Option<String>,
    pub canary_version: Option<String>,
    pub canary_tenants: BTreeSet<String>,
}

/// What [`ModelRegistry::rollback`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackOutcome {
    CanaryCleared { version: String },
    RolledBack { from: Option<String>, to: String },
}

/// Tracks trained artifacts and their deployment state.
pub struct ModelRegistry {
    config: RegistryConfig,
    trainer: Arc<dyn ModelTrainer>,
    state: RwLock<RegistryState>,
    lifecycle: Mutex<()>,
    issued: Mutex<HashSet<String>>,
}

impl ModelRegistry {
    /// Open (or create) a registry, restoring `state.json` if present.
    pub fn open(config: RegistryConfig, trainer: Arc<dyn ModelTrainer>) -> Result<Self> {
        std::fs::create_dir_all(&config.models_dir)?;
        std::fs::create_dir_all(&config.staging_dir)?;

        let state_path = config.models_dir.join(STATE_FILE);
        let state = if state_path.exists() {
            let bytes = std::fs::read(&state_path)?;
            match serde_json::from_slice::<RegistryState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %state_path.display(), error = %e, "unreadable registry state, starting empty");
                    RegistryState::default()
                }
            }
        } else {
            RegistryState::default()
        };
        info!(
            models_dir = %config.models_dir.display(),
            active = ?state.active_version,
            canary = ?state.canary_version,
            "model registry opened"
        );

        Ok(Self {
            config,
            trainer,
            state: RwLock::new(state),
            lifecycle: Mutex::new(()),
            issued: Mutex::new(HashSet::new()),
        })
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current slot pointers.
    pub fn state(&self) -> RegistryState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn active_version(&self) -> Option<String> {
        self.state().active_version
    }

    pub fn canary_version(&self) -> Option<String> {
        self.state().canary_version
    }

    pub fn is_canary_tenant(&self, tenant_id: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.canary_version.is_some() && state.canary_tenants.contains(tenant_id)
    }

    /// Slot serving `tenant_id`: canary for pinned tenants while a canary
    /// is deployed, active otherwise.
    pub fn slot_for_tenant(&self, tenant_id: &str) -> ModelSlot {
        if self.is_canary_tenant(tenant_id) {
            ModelSlot::Canary
        } else {
            ModelSlot::Active
        }
    }

    /// Path of the deployed artifact for a slot.
    pub fn slot_path(&self, slot: ModelSlot) -> PathBuf {
        self.config.slot_path(slot)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Scan the staging directory, newest first.
    pub fn list(&self) -> Result<ModelList> {
        let state = self.state();
        let models = self.scan(&state)?;
        Ok(ModelList {
            models,
            active_version: state.active_version,
            canary_version: state.canary_version,
            canary_tenants: state.canary_tenants.into_iter().collect(),
        })
    }

    fn scan(&self, state: &RegistryState) -> Result<Vec<ModelVersion>> {
        let mut models = Vec::new();
        for entry in std::fs::read_dir(&self.config.staging_dir)? {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str())
                    != Some(self.config.artifact_extension.as_str())
            {
                continue;
            }
            let Some(version) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let created_at: DateTime<Utc> = std::fs::metadata(&path)?.modified()?.into();
            let status = if state.active_version.as_deref() == Some(version) {
                ModelStatus::Active
            } else if state.canary_version.as_deref() == Some(version) {
                ModelStatus::Canary
            } else {
                ModelStatus::Trained
            };
            models.push(ModelVersion {
                version: version.to_string(),
                created_at,
                status,
            });
        }
        models.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(models)
    }

    fn next_version(&self) -> String {
        let base = Utc::now().format(VERSION_FORMAT).to_string();
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        let taken = |v: &str| issued.contains(v) || self.config.artifact_path(v).exists();
        let mut version = base.clone();
        let mut n = 1;
        while taken(&version) {
            version = format!("{base}_{n}");
            n += 1;
        }
        issued.insert(version.clone());
        version
    }

    /// Start training a new version in the background.
    ///
    /// Returns immediately; the artifact appears in [`list`](Self::list)
    /// once the trainer writes it. Runs on tokio's blocking pool inside a
    /// runtime and on its own thread outside one.
    pub fn train(&self, dataset: Option<&Path>) -> TrainJob {
        let version = self.next_version();
        let dataset = dataset
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.default_dataset.clone());
        let output = self.config.artifact_path(&version);
        let trainer = Arc::clone(&self.trainer);

        info!(version = %version, dataset = %dataset.display(), "starting model training");
        let job_version = version.clone();
        TrainJob::spawn(version, move || {
            let result = trainer.train(&dataset, &output);
            match &result {
                Ok(()) => info!(version = %job_version, output = %output.display(), "training completed"),
                Err(e) => error!(version = %job_version, error = %e, "training failed"),
            }
            result
        })
    }

    /// Deploy a staged version to the active slot, or to the canary slot
    /// for `tenants`.
    pub fn deploy(&self, version: &str, canary: bool, tenants: &[String]) -> Result<()> {
        let _guard = self.lock_lifecycle();
        self.deploy_locked(version, canary, tenants)
    }

    fn deploy_locked(&self, version: &str, canary: bool, tenants: &[String]) -> Result<()> {
        if version.is_empty() || version.contains(['/', '\\']) || version.contains("..") {
            return Err(WarmpathError::InvalidInput(format!(
                "invalid model version: {version}"
            )));
        }
        let src = self.config.artifact_path(version);
        if !src.is_file() {
            return Err(WarmpathError::VersionNotFound(version.to_string()));
        }

        let mut next = self.state();
        if canary {
            std::fs::copy(&src, self.config.slot_path(ModelSlot::Canary))?;
            next.canary_version = Some(version.to_string());
            next.canary_tenants = tenants.iter().cloned().collect();
            info!(version, tenants = ?next.canary_tenants, "deployed canary model");
        } else {
            std::fs::copy(&src, self.config.slot_path(ModelSlot::Active))?;
            next.active_version = Some(version.to_string());
            if next.canary_version.as_deref() == Some(version) {
                next.canary_version = None;
                next.canary_tenants.clear();
            }
            info!(version, "deployed active model");
        }
        self.commit(next)
    }

    /// Roll back the canary (`canary_only`) or the active version.
    ///
    /// Active rollback redeploys the version listed right after the current
    /// active one in newest-first order.
    pub fn rollback(&self, canary_only: bool) -> Result<RollbackOutcome> {
        let _guard = self.lock_lifecycle();
        let state = self.state();

        if canary_only {
            let Some(version) = state.canary_version.clone() else {
                return Err(WarmpathError::NoCanary);
            };
            let canary_path = self.config.slot_path(ModelSlot::Canary);
            if canary_path.exists() {
                std::fs::remove_file(&canary_path)?;
            }
            let mut next = state;
            next.canary_version = None;
            next.canary_tenants.clear();
            self.commit(next)?;
            info!(version, "canary rolled back");
            return Ok(RollbackOutcome::CanaryCleared { version });
        }

        let models = self.scan(&state)?;
        if models.is_empty() {
            return Err(WarmpathError::NoModels);
        }
        let previous = state
            .active_version
            .as_deref()
            .and_then(|active| models.iter().position(|m| m.version == active))
            .and_then(|idx| models.get(idx + 1))
            .map(|m| m.version.clone())
            .ok_or(WarmpathError::NoPreviousVersion)?;

        info!(from = ?state.active_version, to = %previous, "rolling back active model");
        self.deploy_locked(&previous, false, &[])?;
        Ok(RollbackOutcome::RolledBack {
            from: state.active_version,
            to: previous,
        })
    }

    /// Persist then publish new slot pointers.
    fn commit(&self, next: RegistryState) -> Result<()> {
        let path = self.config.models_dir.join(STATE_FILE);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&next)?)?;
        std::fs::rename(&tmp, &path)?;
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
        Ok(())
    }
}
