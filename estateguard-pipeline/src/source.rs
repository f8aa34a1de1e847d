//! The source pump: polls enabled source plugins and publishes their
//! batches as raw-listing events.
//!
//! Scrapers are pull-based and finite per batch; the pump gives each
//! enabled source plugin a turn every poll interval, wraps what it fetched
//! in fresh envelopes, and publishes to the raw topic. Cancellation flows
//! into the plugins through the processing context.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use estateguard_events::{Event, EventEnvelope, EventType, TraceContext};
use estateguard_plugins::{PluginRegistry, ProcessingContext};
use estateguard_queue::{topics, MessageQueue};

#[derive(Debug, Clone)]
pub struct SourcePumpConfig {
    pub poll_interval: Duration,
    /// Retry budget stamped into the envelopes the pump publishes.
    pub max_retries: u32,
}

impl Default for SourcePumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

pub struct SourcePump {
    config: SourcePumpConfig,
    queue: Arc<dyn MessageQueue>,
    registry: Arc<PluginRegistry>,
    shutdown: CancellationToken,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SourcePump {
    pub fn new(
        config: SourcePumpConfig,
        queue: Arc<dyn MessageQueue>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            config,
            queue,
            registry,
            shutdown: CancellationToken::new(),
            worker: parking_lot::Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let queue = Arc::clone(&self.queue);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let token = self.shutdown.clone();

        let worker = tokio::spawn(async move {
            info!("source pump started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
                poll_sources(&queue, &registry, &config, &token).await;
            }
            info!("source pump stopped");
        });
        *self.worker.lock() = Some(worker);
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// One polling round, exposed for tests and manual triggering.
    pub async fn poll_once(&self) {
        poll_sources(&self.queue, &self.registry, &self.config, &self.shutdown).await;
    }
}

async fn poll_sources(
    queue: &Arc<dyn MessageQueue>,
    registry: &Arc<PluginRegistry>,
    config: &SourcePumpConfig,
    token: &CancellationToken,
) {
    for entry in registry.list(None) {
        if !entry.is_enabled() {
            continue;
        }
        let Some(source) = entry.instance.as_source() else {
            continue;
        };
        if token.is_cancelled() {
            return;
        }

        // Every scrape round gets its own trace.
        let trace = TraceContext::generate();
        let ctx = ProcessingContext::with_cancel(trace.clone(), token.child_token());
        let started = std::time::Instant::now();
        match source.fetch_batch(&ctx).await {
            Ok(batch) => {
                entry.record_execution(started.elapsed(), true);
                if batch.is_empty() {
                    continue;
                }
                debug!(plugin = entry.id(), count = batch.len(), "source batch fetched");
                for raw in batch {
                    let envelope = EventEnvelope::new(
                        EventType::RawListing,
                        &trace,
                        config.max_retries,
                    )
                    .with_source(raw.source_plugin_id.clone(), platform_of(&raw));
                    match Event::new(envelope, &raw) {
                        Ok(event) => {
                            if let Err(err) = queue.publish(topics::LISTINGS_RAW, event).await {
                                warn!(plugin = entry.id(), error = %err, "raw listing publish failed");
                            }
                        }
                        Err(err) => {
                            warn!(plugin = entry.id(), error = %err, "raw listing encode failed");
                        }
                    }
                }
            }
            Err(err) => {
                entry.record_execution(started.elapsed(), false);
                warn!(plugin = entry.id(), error = %err, "source fetch failed");
            }
        }
    }
}

fn platform_of(raw: &estateguard_events::RawListingBody) -> String {
    raw.payload
        .get("platform")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}
