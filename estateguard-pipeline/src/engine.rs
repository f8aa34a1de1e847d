//! The orchestrator engine: raw event in, processed/fraud/failed events
//! out.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use estateguard_events::{
    Event, EventStatus, EventType, FraudDetectedBody, NormalizedListing, ProcessedListingBody,
    ProcessingFailedBody, RawListingBody,
};
use estateguard_plugins::{PipelineItem, PluginRegistry, ProcessingContext};
use estateguard_queue::{
    handler, topics, HandlerError, MessageQueue, QueueError, QueueMessage, SubscriptionId,
};
use estateguard_scoring::{RiskAssessment, RiskScorer};

use crate::retry::{FailureKind, PipelineFailure, RetryDecision, RetryPolicy};
use crate::stats::{OrchestratorStats, OrchestratorStatsSnapshot};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    /// Wall-time budget for one listing's pipeline plus scoring.
    pub listing_deadline: Duration,
    /// How long shutdown waits for in-flight handlers to drain.
    pub shutdown_deadline: Duration,
    /// Fraud events are emitted at and above this score.
    pub fraud_event_threshold: f64,
    /// How many terminal event ids the duplicate guard remembers.
    pub idempotency_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            listing_deadline: Duration::from_secs(60),
            shutdown_deadline: Duration::from_secs(10),
            fraud_event_threshold: 70.0,
            idempotency_window: 4096,
        }
    }
}

/// Bounded set of terminally handled event ids. Duplicate deliveries of an
/// already-processed event are acked without reprocessing.
struct SeenCache {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: Uuid) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// Health view over the orchestrator and its queue.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorHealth {
    pub accepting: bool,
    pub in_flight: usize,
    pub queue_connected: bool,
    pub queue_latency_ms: u64,
    pub stats: OrchestratorStatsSnapshot,
}

pub struct ProcessingOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    queue: Arc<dyn MessageQueue>,
    registry: Arc<PluginRegistry>,
    scorer: RiskScorer,
    stats: OrchestratorStats,
    shutdown: CancellationToken,
    in_flight: AtomicUsize,
    seen: Mutex<SeenCache>,
}

/// Decrements the in-flight count when a handler leaves scope, whatever
/// path it takes out.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ProcessingOrchestrator {
    pub fn new(
        config: PipelineConfig,
        queue: Arc<dyn MessageQueue>,
        registry: Arc<PluginRegistry>,
        scorer: RiskScorer,
    ) -> Self {
        let seen = SeenCache::new(config.idempotency_window);
        Self {
            inner: Arc::new(Inner {
                config,
                queue,
                registry,
                scorer,
                stats: OrchestratorStats::default(),
                shutdown: CancellationToken::new(),
                in_flight: AtomicUsize::new(0),
                seen: Mutex::new(seen),
            }),
        }
    }

    /// Subscribe to the raw-listing topic and start processing.
    pub async fn start(&self) -> Result<SubscriptionId, QueueError> {
        let inner = Arc::clone(&self.inner);
        let subscription = self
            .inner
            .queue
            .subscribe(
                topics::LISTINGS_RAW,
                handler(move |message: QueueMessage| {
                    let inner = Arc::clone(&inner);
                    async move { inner.handle(message).await }
                }),
            )
            .await?;
        info!(subscription, "processing orchestrator consuming raw listings");
        Ok(subscription)
    }

    /// Stop intake, drain in-flight handlers within the shutdown deadline,
    /// then close the queue. Whatever cannot drain is requeued by the
    /// backend on disconnect.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        info!("processing orchestrator shutting down");
        self.inner.shutdown.cancel();

        let drain_deadline = Instant::now() + self.inner.config.shutdown_deadline;
        while self.inner.in_flight.load(Ordering::Acquire) > 0 {
            if Instant::now() >= drain_deadline {
                warn!(
                    in_flight = self.inner.in_flight.load(Ordering::Acquire),
                    "shutdown deadline reached with handlers still in flight"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.inner.queue.disconnect().await
    }

    pub fn stats(&self) -> OrchestratorStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub async fn health(&self) -> OrchestratorHealth {
        let queue = self.inner.queue.health_check().await;
        OrchestratorHealth {
            accepting: !self.inner.shutdown.is_cancelled(),
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
            queue_connected: queue.connected,
            queue_latency_ms: queue.latency.as_millis() as u64,
            stats: self.inner.stats.snapshot(),
        }
    }
}

impl Inner {
    async fn handle(self: &Arc<Self>, message: QueueMessage) -> Result<(), HandlerError> {
        if self.shutdown.is_cancelled() {
            return Err(HandlerError::Transient("orchestrator is shutting down".into()));
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let _guard = InFlightGuard(&self.in_flight);

        let envelope = message.event.envelope.clone();
        let span = info_span!(
            "process_listing",
            trace_id = %envelope.trace_id,
            request_id = %envelope.request_id,
            event_id = %envelope.event_id,
            retry_count = envelope.retry_count,
        );
        self.handle_event(message.event).instrument(span).await
    }

    async fn handle_event(self: &Arc<Self>, event: Event) -> Result<(), HandlerError> {
        let envelope = event.envelope.clone();

        if envelope.event_type != EventType::RawListing {
            warn!(event_type = ?envelope.event_type, "ignoring non-raw event on the raw topic");
            return Ok(());
        }

        // Idempotence: a redelivery of a terminally handled event is acked
        // without side effects.
        if self.seen.lock().contains(&envelope.event_id) {
            debug!("duplicate delivery of a handled event, skipping");
            self.stats.record_duplicate();
            return Ok(());
        }

        let raw: RawListingBody = match event.decode_body() {
            Ok(raw) => raw,
            Err(err) => {
                // An unparseable body can never succeed; straight to the
                // dead-letter path.
                let failure =
                    PipelineFailure::permanent(format!("raw listing body failed to decode: {err}"));
                return self.fail(&event, failure).await;
            }
        };

        let cancel = self.shutdown.child_token();
        let ctx = ProcessingContext::with_cancel(envelope.trace(), cancel.clone());
        let started = Instant::now();

        let outcome =
            match tokio::time::timeout(self.config.listing_deadline, self.run_pipeline(&raw, &ctx))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Cancel outstanding plugin work cooperatively, then
                    // route by retry budget.
                    cancel.cancel();
                    Err(PipelineFailure::transient(format!(
                        "listing deadline of {:?} exceeded",
                        self.config.listing_deadline
                    )))
                }
            };

        match outcome {
            Ok((listing, stages, assessment)) => {
                self.emit_processed(&event, listing, stages, assessment, started.elapsed())
                    .await
            }
            Err(failure) => self.fail(&event, failure).await,
        }
    }

    /// Run the enabled processing plugins in priority order, then score.
    async fn run_pipeline(
        &self,
        raw: &RawListingBody,
        ctx: &ProcessingContext,
    ) -> Result<(NormalizedListing, Vec<String>, RiskAssessment), PipelineFailure> {
        let mut item = PipelineItem::new(raw.clone());
        let mut stages = Vec::new();

        for entry in self.registry.enabled_processing() {
            let Some(stage) = entry.instance.as_processing() else {
                continue;
            };
            if ctx.is_cancelled() {
                return Err(PipelineFailure::transient("pipeline cancelled"));
            }
            let stage_name = stage.stage_name().to_string();
            let stage_started = Instant::now();
            match stage.process(item, ctx).await {
                Ok(next) => {
                    entry.record_execution(stage_started.elapsed(), true);
                    self.stats.record_plugin_execution(entry.id());
                    stages.push(stage_name);
                    item = next;
                }
                Err(err) => {
                    entry.record_execution(stage_started.elapsed(), false);
                    self.stats.record_plugin_execution(entry.id());
                    return Err(PipelineFailure::from_plugin(&stage_name, err));
                }
            }
        }

        let listing = item.listing.ok_or_else(|| {
            PipelineFailure::permanent("no enabled normalizer stage produced a listing")
        })?;
        listing
            .validate()
            .map_err(|err| PipelineFailure::permanent(format!("listing invalid: {err}")))?;

        let assessment = self.scorer.score(&listing, ctx).await;
        Ok((listing, stages, assessment))
    }

    async fn emit_processed(
        self: &Arc<Self>,
        raw_event: &Event,
        listing: NormalizedListing,
        stages: Vec<String>,
        assessment: RiskAssessment,
        duration: Duration,
    ) -> Result<(), HandlerError> {
        let mut processed_envelope = raw_event.envelope.child(EventType::ListingProcessed);
        processed_envelope.status = EventStatus::Completed;

        let platform = listing.source.platform.clone();
        let listing_id = listing.listing_id;
        let body = ProcessedListingBody {
            listing,
            stages,
            fraud_score: assessment.fraud_score,
            risk_level: assessment.risk_level,
            signals: assessment.signals.clone(),
            processing_duration_ms: duration.as_millis() as u64,
        };
        let processed = Event::new(processed_envelope, &body)
            .map_err(|err| HandlerError::Permanent(format!("processed event encode: {err}")))?;

        self.publish(topics::LISTINGS_PROCESSED, processed.clone())
            .await?;

        if assessment.fraud_score >= self.config.fraud_event_threshold {
            // Lineage: the fraud event is a child of the processed event.
            let mut fraud_envelope = processed.envelope.child(EventType::FraudDetected);
            fraud_envelope.status = EventStatus::Completed;
            let fraud_body = FraudDetectedBody {
                listing_id,
                platform,
                fraud_score: assessment.fraud_score,
                risk_level: assessment.risk_level,
                signals: assessment.signals,
            };
            let fraud = Event::new(fraud_envelope, &fraud_body)
                .map_err(|err| HandlerError::Permanent(format!("fraud event encode: {err}")))?;
            self.publish(topics::FRAUD_DETECTED, fraud).await?;
            info!(
                %listing_id,
                fraud_score = assessment.fraud_score,
                "fraud detected"
            );
        }

        self.seen.lock().insert(raw_event.envelope.event_id);
        self.stats.record_success(duration);
        debug!(%listing_id, fraud_score = assessment.fraud_score, "listing processed");
        Ok(())
    }

    /// Route a failed run: transient failures with remaining budget go back
    /// to the raw topic with an incremented retry count; everything else
    /// produces one failure event and one dead-letter entry.
    async fn fail(self: &Arc<Self>, event: &Event, failure: PipelineFailure) -> Result<(), HandlerError> {
        let envelope = &event.envelope;
        let decision = self.config.retry.decide(
            envelope.retry_count,
            envelope.max_retries,
            failure.kind,
        );

        match decision {
            RetryDecision::Retry => {
                let retry = Event {
                    envelope: envelope.next_attempt(),
                    body: event.body.clone(),
                };
                warn!(
                    retry_count = retry.envelope.retry_count,
                    error = %failure,
                    "pipeline failed transiently, re-publishing for retry"
                );
                self.publish(topics::LISTINGS_RAW, retry).await?;
                self.stats.record_retry();
                Ok(())
            }
            RetryDecision::DeadLetter => {
                let mut failed_envelope = envelope.child(EventType::ProcessingFailed);
                failed_envelope.status = EventStatus::DeadLettered;
                let body = ProcessingFailedBody {
                    error_kind: failure.kind.as_str().to_string(),
                    message: failure.message.clone(),
                    stage: failure.stage.clone(),
                    original: serde_json::to_value(event)
                        .unwrap_or(serde_json::Value::Null),
                };
                let failed = Event::new(failed_envelope, &body)
                    .map_err(|err| HandlerError::Permanent(format!("failure event encode: {err}")))?;

                warn!(error = %failure, "pipeline failed terminally, dead-lettering");
                self.publish(topics::PROCESSING_FAILED, failed.clone()).await?;
                self.publish(topics::DEAD_LETTER, failed).await?;

                self.seen.lock().insert(envelope.event_id);
                self.stats.record_failure();
                self.stats.record_dead_letter();
                Ok(())
            }
        }
    }

    /// Publish with queue errors mapped to transient handler failures, so
    /// the broker redelivers the original message rather than losing it.
    async fn publish(&self, topic: &str, event: Event) -> Result<(), HandlerError> {
        self.queue
            .publish(topic, event)
            .await
            .map(|_| ())
            .map_err(|err| HandlerError::Transient(format!("publish to `{topic}` failed: {err}")))
    }
}
