//! End-to-end pipeline scenarios over the in-memory queue: the happy path,
//! the fraud path, transient retries and the permanent dead-letter path.

mod common;

use std::sync::Arc;

use estateguard_events::{
    EventType, FraudDetectedBody, ProcessedListingBody, ProcessingFailedBody, RiskLevel,
};
use estateguard_pipeline::{PipelineConfig, ProcessingOrchestrator};
use estateguard_plugins::PluginManager;
use estateguard_queue::{topics, InMemoryQueue, MessageQueue};
use estateguard_scoring::{RiskScorer, ScoringConfig};

use common::*;

struct Harness {
    queue: Arc<dyn MessageQueue>,
    orchestrator: ProcessingOrchestrator,
    _manager: PluginManager,
    _root: tempfile::TempDir,
}

/// Build a running node core from a set of plugin manifests.
async fn harness(manifests: Vec<(&str, String)>) -> Harness {
    let root = tempfile::tempdir().unwrap();
    for (dir, manifest) in &manifests {
        write_plugin(root.path(), dir, manifest);
    }

    let manager = manager_for(root.path());
    let report = manager.load_all().await;
    assert!(
        report.failed.is_empty(),
        "fixture plugins failed to load: {:?}",
        report.failed
    );
    let failures = manager.enable_all().await;
    assert!(failures.is_empty(), "fixture plugins failed to enable: {failures:?}");

    let queue: Arc<dyn MessageQueue> = Arc::new(InMemoryQueue::default());
    queue.connect().await.unwrap();

    let scorer = RiskScorer::new(manager.registry(), ScoringConfig::default());
    let orchestrator = ProcessingOrchestrator::new(
        PipelineConfig::default(),
        Arc::clone(&queue),
        manager.registry(),
        scorer,
    );

    Harness {
        queue,
        orchestrator,
        _manager: manager,
        _root: root,
    }
}

fn three_stage_pipeline() -> Vec<(&'static str, String)> {
    vec![
        ("normalizer", NORMALIZER_MANIFEST.to_string()),
        ("geocode", scripted_stage_manifest("geocode", 2, "")),
        ("enrich", ENRICH_MANIFEST.to_string()),
    ]
}

#[tokio::test]
async fn happy_pipeline_emits_one_safe_processed_event() {
    let mut manifests = three_stage_pipeline();
    manifests.push(("det-a", detector_manifest("a", 0.1, 0.5)));
    manifests.push(("det-b", detector_manifest("b", 0.2, 0.5)));
    let harness = harness(manifests).await;

    let processed = collect_topic(&harness.queue, topics::LISTINGS_PROCESSED).await;
    let fraud = collect_topic(&harness.queue, topics::FRAUD_DETECTED).await;
    harness.orchestrator.start().await.unwrap();

    harness
        .queue
        .publish(topics::LISTINGS_RAW, raw_listing_event(3))
        .await
        .unwrap();

    wait_until(|| !processed.lock().unwrap().is_empty()).await;
    let events = processed.lock().unwrap().clone();
    assert_eq!(events.len(), 1);

    let body: ProcessedListingBody = events[0].decode_body().unwrap();
    assert_eq!(body.stages, vec!["normalize", "geocode", "enrich"]);
    assert!((body.fraud_score - 15.0).abs() < 1e-9);
    assert_eq!(body.risk_level, RiskLevel::Safe);
    assert_eq!(body.listing.source.platform, "idealista");
    assert_eq!(body.listing.price.amount, 500_000.0);

    // Safe listings never produce a fraud event.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(fraud.lock().unwrap().is_empty());

    harness.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn fraud_scores_emit_a_linked_fraud_event() {
    let mut manifests = three_stage_pipeline();
    manifests.push(("det-a", detector_manifest("a", 0.9, 0.6)));
    manifests.push(("det-b", detector_manifest("b", 0.8, 0.4)));
    let harness = harness(manifests).await;

    let processed = collect_topic(&harness.queue, topics::LISTINGS_PROCESSED).await;
    let fraud = collect_topic(&harness.queue, topics::FRAUD_DETECTED).await;
    harness.orchestrator.start().await.unwrap();

    harness
        .queue
        .publish(topics::LISTINGS_RAW, raw_listing_event(3))
        .await
        .unwrap();

    wait_until(|| !processed.lock().unwrap().is_empty() && !fraud.lock().unwrap().is_empty()).await;

    let processed_event = processed.lock().unwrap()[0].clone();
    let processed_body: ProcessedListingBody = processed_event.decode_body().unwrap();
    assert!((processed_body.fraud_score - 86.0).abs() < 1e-9);
    assert_eq!(processed_body.risk_level, RiskLevel::Fraud);

    let fraud_event = fraud.lock().unwrap()[0].clone();
    let fraud_body: FraudDetectedBody = fraud_event.decode_body().unwrap();
    assert!((fraud_body.fraud_score - 86.0).abs() < 1e-9);

    // Lineage: the fraud event is a child of the processed event and keeps
    // its trace identity.
    assert_eq!(
        fraud_event.envelope.parent_event_id,
        Some(processed_event.envelope.event_id)
    );
    assert_eq!(fraud_event.envelope.trace_id, processed_event.envelope.trace_id);
    assert_eq!(fraud_event.envelope.event_type, EventType::FraudDetected);

    harness.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let mut manifests = vec![
        ("normalizer", NORMALIZER_MANIFEST.to_string()),
        (
            "geocode",
            scripted_stage_manifest("geocode", 2, "    fail_times: 2\n    fail_kind: transient\n"),
        ),
        ("enrich", ENRICH_MANIFEST.to_string()),
    ];
    manifests.push(("det-a", detector_manifest("a", 0.1, 1.0)));
    let harness = harness(manifests).await;

    let processed = collect_topic(&harness.queue, topics::LISTINGS_PROCESSED).await;
    let dead = collect_topic(&harness.queue, topics::DEAD_LETTER).await;
    harness.orchestrator.start().await.unwrap();

    harness
        .queue
        .publish(topics::LISTINGS_RAW, raw_listing_event(3))
        .await
        .unwrap();

    wait_until(|| !processed.lock().unwrap().is_empty()).await;

    // Two transient failures, two re-publishes with increasing retry
    // counts, success on the third attempt.
    let stats = harness.orchestrator.stats();
    assert_eq!(stats.events_retried, 2);
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.events_dead_lettered, 0);

    let processed_event = processed.lock().unwrap()[0].clone();
    let body: ProcessedListingBody = processed_event.decode_body().unwrap();
    assert_eq!(body.stages, vec!["normalize", "geocode", "enrich"]);
    assert!(dead.lock().unwrap().is_empty());

    harness.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn permanent_failures_dead_letter_without_retrying() {
    let manifests = vec![
        ("normalizer", NORMALIZER_MANIFEST.to_string()),
        (
            "broken",
            scripted_stage_manifest("broken", 2, "    fail_times: 1\n    fail_kind: permanent\n"),
        ),
    ];
    let harness = harness(manifests).await;

    let processed = collect_topic(&harness.queue, topics::LISTINGS_PROCESSED).await;
    let failed = collect_topic(&harness.queue, topics::PROCESSING_FAILED).await;
    let dead = collect_topic(&harness.queue, topics::DEAD_LETTER).await;
    harness.orchestrator.start().await.unwrap();

    harness
        .queue
        .publish(topics::LISTINGS_RAW, raw_listing_event(3))
        .await
        .unwrap();

    wait_until(|| !failed.lock().unwrap().is_empty() && !dead.lock().unwrap().is_empty()).await;

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.events_retried, 0);
    assert_eq!(stats.events_dead_lettered, 1);

    let failure = failed.lock().unwrap()[0].clone();
    let body: ProcessingFailedBody = failure.decode_body().unwrap();
    assert_eq!(body.error_kind, "permanent");
    assert_eq!(body.stage.as_deref(), Some("broken"));
    // The original raw event rides along for manual replay.
    assert!(body.original.get("event_id").is_some());

    assert_eq!(failed.lock().unwrap().len(), 1);
    assert_eq!(dead.lock().unwrap().len(), 1);
    assert!(processed.lock().unwrap().is_empty());

    harness.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn reprocessing_the_same_event_id_is_idempotent() {
    let mut manifests = three_stage_pipeline();
    manifests.push(("det-a", detector_manifest("a", 0.3, 1.0)));
    let harness = harness(manifests).await;

    let processed = collect_topic(&harness.queue, topics::LISTINGS_PROCESSED).await;
    harness.orchestrator.start().await.unwrap();

    let event = raw_listing_event(3);
    harness
        .queue
        .publish(topics::LISTINGS_RAW, event.clone())
        .await
        .unwrap();
    wait_until(|| processed.lock().unwrap().len() == 1).await;

    // Second delivery of the same event id: acked, not reprocessed.
    harness
        .queue
        .publish(topics::LISTINGS_RAW, event)
        .await
        .unwrap();
    wait_until(|| harness.orchestrator.stats().duplicates_skipped == 1).await;
    assert_eq!(processed.lock().unwrap().len(), 1);

    let body: ProcessedListingBody = processed.lock().unwrap()[0].decode_body().unwrap();
    // The listing identity is derived from the source, so a reprocess
    // would have produced the identical listing anyway.
    assert_eq!(
        body.listing.source.external_id.as_deref(),
        Some("L1")
    );

    harness.orchestrator.shutdown().await.unwrap();
}
