//! Shared fixtures for the end-to-end tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use estateguard_events::{Event, EventEnvelope, EventType, RawListingBody, TraceContext};
use estateguard_manifest::Version;
use estateguard_plugins::{EntrypointRegistry, PluginManager, PluginManagerConfig};
use estateguard_queue::{handler, MessageQueue, QueueMessage};

pub fn write_plugin(root: &Path, dir: &str, manifest: &str) -> std::path::PathBuf {
    let plugin_dir = root.join(dir);
    std::fs::create_dir_all(&plugin_dir).unwrap();
    let path = plugin_dir.join("plugin.yaml");
    std::fs::write(&path, manifest).unwrap();
    path
}

pub fn manager_for(root: &Path) -> PluginManager {
    PluginManager::new(
        PluginManagerConfig {
            root_dir: root.to_path_buf(),
            core_version: Version::new(0, 1, 0),
            shutdown_deadline: Duration::from_millis(500),
            hook_timeout: Duration::from_secs(5),
        },
        EntrypointRegistry::with_builtins(),
    )
    .with_env(HashMap::new())
}

/// A raw-listing event for the Lisboa happy-path fixture.
pub fn raw_listing_event(max_retries: u32) -> Event {
    let envelope = EventEnvelope::new(EventType::RawListing, &TraceContext::generate(), max_retries);
    let body = RawListingBody {
        payload: serde_json::json!({
            "platform": "idealista",
            "external_id": "L1",
            "listing_type": "sale",
            "property_type": "apartment",
            "price": {"amount": 500000.0, "currency": "EUR"},
            "city": "Lisboa",
            "area_sqm": 120.0,
            "description": "Spacious apartment with a view over the Tejo river and a large balcony.",
        }),
        source_url: "https://portal.test/listings/L1".into(),
        scraped_at: Utc::now(),
        source_plugin_id: "plugin-source-fixtures".into(),
    };
    Event::new(envelope, &body).unwrap()
}

/// Subscribe a collector that copies every event on `topic` into a vec.
pub async fn collect_topic(
    queue: &Arc<dyn MessageQueue>,
    topic: &str,
) -> Arc<Mutex<Vec<Event>>> {
    let sink: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let clone = Arc::clone(&sink);
    queue
        .subscribe(
            topic,
            handler(move |message: QueueMessage| {
                let sink = Arc::clone(&clone);
                async move {
                    sink.lock().unwrap().push(message.event);
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();
    sink
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub const NORMALIZER_MANIFEST: &str = r#"
id: plugin-processing-normalizer
name: Listing Normalizer
version: 1.2.0
kind: processing
api_version: "1.0"
description: maps raw portal payloads into the unified listing model
entrypoint:
  module: estateguard.builtin
  class: ListingNormalizer
priority: 1
"#;

pub const ENRICH_MANIFEST: &str = r#"
id: plugin-processing-enrich
name: Listing Enricher
version: 1.0.0
kind: processing
api_version: "1.0"
description: derives price-per-sqm and tidies listing text
entrypoint:
  module: estateguard.builtin
  class: ListingEnricher
priority: 3
"#;

pub fn detector_manifest(slug: &str, score: f64, weight: f64) -> String {
    format!(
        r#"
id: plugin-detection-{slug}
name: Scripted detector {slug}
version: 1.0.0
kind: detection
api_version: "1.0"
description: scripted detector used by the end-to-end scenarios
entrypoint:
  module: estateguard.testkit
  class: ScriptedDetection
weight: {weight}
config:
  defaults:
    score: {score}
    confidence: 0.9
"#
    )
}

pub fn scripted_stage_manifest(stage: &str, priority: i32, extra_defaults: &str) -> String {
    format!(
        r#"
id: plugin-processing-{stage}
name: Scripted stage {stage}
version: 1.0.0
kind: processing
api_version: "1.0"
description: scripted pipeline stage used by the end-to-end scenarios
entrypoint:
  module: estateguard.testkit
  class: ScriptedProcessing
priority: {priority}
config:
  defaults:
    stage: {stage}
{extra_defaults}
"#
    )
}
