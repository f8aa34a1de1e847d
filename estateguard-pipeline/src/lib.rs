//! # Processing Orchestrator
//!
//! Consumes raw-listing events, runs the priority-ordered pipeline of
//! processing plugins, hands the normalized listing to the risk scorer,
//! emits processed and fraud events, and routes failures through retry and
//! dead-letter paths.
//!
//! Ordering and duplication: there is no global ordering across listings;
//! handling is sequential within one delivery and consumers are idempotent
//! on `event_id`. Delivery is at-least-once end to end.

mod engine;
mod retry;
mod source;
mod stats;

pub use engine::{OrchestratorHealth, PipelineConfig, ProcessingOrchestrator};
pub use retry::{FailureKind, PipelineFailure, RetryDecision, RetryPolicy};
pub use source::{SourcePump, SourcePumpConfig};
pub use stats::{OrchestratorStats, OrchestratorStatsSnapshot};
