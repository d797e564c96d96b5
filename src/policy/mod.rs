//! Policy computation: heuristic fallback, reasoning engine, bandit override.

pub mod bandit;
pub mod engine;
pub mod heuristic;
pub mod parse;

pub use bandit::{BanditAction, BanditConfig, BanditOverride, FEATURE_DIM, FeatureVector};
pub use engine::{DecisionCacheEntry, PolicyCacheConfig, ReasoningPolicyEngine};
pub use heuristic::HeuristicPolicy;
pub use parse::parse_policy_response;
