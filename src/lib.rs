//! Warmpath - adaptive cache-control decisions for a vector-search warm path
//!
//! The serving layer reports per-tenant system metrics and cluster-access
//! sequences; warmpath answers with a cache policy (admission threshold,
//! TTL, eviction priority), prefetch rules and per-tenant index parameters.
//! Decisions come from a cheap heuristic, optionally refined in the
//! background by an external reasoning service under a strict rate and
//! token budget, and adjusted online by an epsilon-greedy bandit.
//!
//! # Example
//!
//! ```rust,no_run
//! use warmpath::{Orchestrator, SystemMetricsSnapshot};
//!
//! #[tokio::main]
//! async fn main() -> warmpath::Result<()> {
//!     let orchestrator = Orchestrator::builder()
//!         .gemini("your-api-key")
//!         .build()?;
//!     orchestrator.start();
//!
//!     let metrics = SystemMetricsSnapshot::new(120.0, 0.35, 42.0, 80.0, 12.0);
//!     let decision = orchestrator.report_metrics("tenant-a", &metrics);
//!     println!("ttl = {}s", decision.ttl_seconds);
//!
//!     orchestrator.report_cluster_access("tenant-a", "products", &[1, 2, 1, 2, 1, 2, 1, 2]);
//!     orchestrator.sequence().compact();
//!     assert_eq!(orchestrator.predict_next("tenant-a", "products", 1), 2);
//!
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod advisory;
pub mod config;
pub mod decision_log;
pub mod error;
mod extract;
pub mod orchestrator;
pub mod policy;
pub mod reasoning;
pub mod registry;
pub mod sequence;
pub mod telemetry;
pub mod types;

pub use error::{Result, WarmpathError};
pub use orchestrator::{EvaluationReport, Orchestrator, OrchestratorBuilder};
pub use policy::{BanditAction, BanditOverride, HeuristicPolicy, ReasoningPolicyEngine};
pub use reasoning::{GeminiClient, RateBudgetGate, ReasoningService, ReasoningTaskQueue};
pub use registry::{ModelRegistry, ModelSlot};
pub use sequence::{NO_PREDICTION, PrefetchRule, SequenceMiner};
pub use types::{
    IndexPolicy, PolicyDecision, PolicySource, QuantizedMetricsKey, SystemMetricsSnapshot,
    TenantIndexKey,
};

/// Crate version, reported by the daemon at startup.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
