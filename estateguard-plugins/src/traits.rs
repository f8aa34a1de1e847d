//! The contracts each plugin kind implements.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use estateguard_events::{NormalizedListing, RawListingBody, RiskSignal, TraceContext};

use crate::error::PluginRuntimeError;

/// Context threaded through every pipeline and scoring call: the trace
/// identity of the work and a cancellation token plugins should observe at
/// their own suspension points.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub trace: TraceContext,
    pub cancel: CancellationToken,
}

impl ProcessingContext {
    pub fn new(trace: TraceContext) -> Self {
        Self {
            trace,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(trace: TraceContext, cancel: CancellationToken) -> Self {
        Self { trace, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The unit of work moving through the processing pipeline.
///
/// The raw scrape is always present; the normalized listing appears once a
/// normalizer stage has run. Stages return a new item instead of mutating
/// shared state.
#[derive(Debug, Clone)]
pub struct PipelineItem {
    pub raw: RawListingBody,
    pub listing: Option<NormalizedListing>,
}

impl PipelineItem {
    pub fn new(raw: RawListingBody) -> Self {
        Self { raw, listing: None }
    }

    /// The normalized listing, or a permanent error when no normalizer has
    /// run yet. Stages past the normalizer use this.
    pub fn listing(&self) -> Result<&NormalizedListing, PluginRuntimeError> {
        self.listing.as_ref().ok_or_else(|| {
            PluginRuntimeError::permanent("pipeline item has not been normalized yet")
        })
    }

    pub fn with_listing(mut self, listing: NormalizedListing) -> Self {
        self.listing = Some(listing);
        self
    }
}

/// Shared lifecycle contract. All methods have do-nothing defaults so a
/// plugin only implements what it needs; errors use `anyhow` because they
/// cross the plugin boundary and the manager attaches the plugin identity
/// itself.
///
/// Implementations must be `Send + Sync`: lifecycle calls and pipeline
/// calls can arrive from different workers. Interior mutability is the
/// plugin's own business.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Bind merged configuration. Called once after construction and again
    /// with fresh configuration on hot reload.
    async fn configure(&self, config: &serde_json::Value) -> anyhow::Result<()> {
        let _ = config;
        Ok(())
    }

    async fn on_enable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_disable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources. Bounded by the manager's shutdown deadline during
    /// reload and unregister.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A scraper. Produces finite batches of raw listings; an empty batch means
/// the source is exhausted for now. Implementations must respect the
/// context's cancellation token across network calls.
#[async_trait]
pub trait SourcePlugin: Plugin {
    async fn fetch_batch(
        &self,
        ctx: &ProcessingContext,
    ) -> Result<Vec<RawListingBody>, PluginRuntimeError>;
}

/// A pipeline stage. Stages run strictly sequentially in ascending priority
/// order; the first error aborts the pipeline for that listing.
#[async_trait]
pub trait ProcessingPlugin: Plugin {
    /// Name recorded in the processed event's stage list.
    fn stage_name(&self) -> &str;

    /// Pipeline position when the manifest carries no `priority` hint.
    /// Lower runs earlier.
    fn default_priority(&self) -> i32 {
        100
    }

    async fn process(
        &self,
        item: PipelineItem,
        ctx: &ProcessingContext,
    ) -> Result<PipelineItem, PluginRuntimeError>;
}

/// What a detection plugin reports for one listing.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// The plugin's overall fraud estimate for the listing, in `[0, 1]`.
    pub overall_score: f64,
    /// The plugin's own confidence in that estimate. When absent, the mean
    /// of the emitted signal confidences is used.
    pub confidence: Option<f64>,
    pub signals: Vec<RiskSignal>,
}

impl DetectionOutcome {
    pub fn clean() -> Self {
        Self {
            overall_score: 0.0,
            confidence: Some(1.0),
            signals: Vec::new(),
        }
    }
}

/// A fraud detector. Detectors run concurrently under the scoring deadline;
/// a detector that errors is dropped from the aggregate for that listing.
#[async_trait]
pub trait DetectionPlugin: Plugin {
    /// Aggregation weight in `[0, 1]` when the manifest carries no `weight`
    /// hint.
    fn default_weight(&self) -> f64 {
        1.0
    }

    async fn analyze(
        &self,
        listing: &NormalizedListing,
        ctx: &ProcessingContext,
    ) -> Result<DetectionOutcome, PluginRuntimeError>;
}
