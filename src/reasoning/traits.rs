//! External reasoning-service boundary.
//!
//! The core never talks to a model API directly: everything goes through
//! [`ReasoningService`], called exclusively from the
//! [`ReasoningTaskQueue`](super::ReasoningTaskQueue) worker. Any `Err` is
//! treated as "no answer".

use async_trait::async_trait;

use crate::Result;

/// Text-in, text-out reasoning service (an LLM behind an API).
///
/// Calls may take seconds and may fail; callers of the core are never
/// exposed to that latency because only the queue worker awaits this.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Service name for logging/debugging.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
