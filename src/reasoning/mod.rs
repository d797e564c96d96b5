//! Budgeted access to the external reasoning service.
//!
//! - [`RateBudgetGate`]: per-minute and monthly ceilings, shared process-wide
//! - [`ReasoningTaskQueue`]: bounded FIFO + single worker that calls the service
//! - [`ReasoningService`]: the service boundary; [`GeminiClient`] implements it

pub mod budget;
pub mod gemini;
pub mod prompts;
pub mod queue;
pub mod traits;

pub use budget::{BudgetConfig, RATE_WINDOW, RateBudgetGate};
pub use gemini::GeminiClient;
pub use queue::{CompletionHandler, QueueConfig, QueueStats, ReasoningTaskQueue, estimate_tokens};
pub use traits::ReasoningService;
