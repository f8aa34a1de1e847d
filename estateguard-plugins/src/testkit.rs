//! Scripted plugins with config-driven behavior.
//!
//! These back integration tests and local demos: a processing stage that
//! can be told to fail N times before succeeding, and a detector that
//! reports a fixed score. They are compiled in like any built-in and
//! selected through the `estateguard.testkit` module.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use estateguard_events::{NormalizedListing, RiskSignal};

use crate::error::PluginRuntimeError;
use crate::factory::EntrypointRegistry;
use crate::state::PluginInstance;
use crate::traits::{
    DetectionOutcome, DetectionPlugin, PipelineItem, Plugin, ProcessingContext, ProcessingPlugin,
};

/// Module name manifests use to select a testkit class.
pub const TESTKIT_MODULE: &str = "estateguard.testkit";

pub fn register_testkit(registry: &mut EntrypointRegistry) {
    registry.register(TESTKIT_MODULE, "ScriptedProcessing", |_manifest| {
        Ok(PluginInstance::Processing(Arc::new(ScriptedProcessing::default())))
    });
    registry.register(TESTKIT_MODULE, "ScriptedDetection", |manifest| {
        Ok(PluginInstance::Detection(Arc::new(ScriptedDetection::new(
            manifest.id.clone(),
        ))))
    });
}

#[derive(Debug, Clone)]
struct ScriptedProcessingConfig {
    stage: String,
    fail_times: u32,
    fail_kind: String,
    /// When set, `shutdown` writes `closed` to this file.
    shutdown_marker: Option<PathBuf>,
    /// Token recorded into the listing metadata, so tests can tell which
    /// generation of the plugin processed a listing.
    marker: Option<String>,
}

impl Default for ScriptedProcessingConfig {
    fn default() -> Self {
        Self {
            stage: "scripted".to_string(),
            fail_times: 0,
            fail_kind: "transient".to_string(),
            shutdown_marker: None,
            marker: None,
        }
    }
}

#[derive(Default)]
pub struct ScriptedProcessing {
    config: RwLock<ScriptedProcessingConfig>,
    /// Fixed at first configure; `stage_name` returns a borrow of self.
    stage: std::sync::OnceLock<String>,
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Plugin for ScriptedProcessing {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        let mut guard = self.config.write();
        if let Some(stage) = config.get("stage").and_then(Value::as_str) {
            guard.stage = stage.to_string();
        }
        if let Some(times) = config.get("fail_times").and_then(Value::as_u64) {
            guard.fail_times = times as u32;
            self.remaining_failures.store(times as u32, Ordering::SeqCst);
        }
        if let Some(kind) = config.get("fail_kind").and_then(Value::as_str) {
            anyhow::ensure!(
                kind == "transient" || kind == "permanent",
                "fail_kind must be `transient` or `permanent`"
            );
            guard.fail_kind = kind.to_string();
        }
        if let Some(path) = config.get("shutdown_marker").and_then(Value::as_str) {
            guard.shutdown_marker = Some(PathBuf::from(path));
        }
        if let Some(marker) = config.get("marker").and_then(Value::as_str) {
            guard.marker = Some(marker.to_string());
        }
        let _ = self.stage.set(guard.stage.clone());
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let marker = self.config.read().shutdown_marker.clone();
        if let Some(path) = marker {
            tokio::fs::write(&path, "closed").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingPlugin for ScriptedProcessing {
    fn stage_name(&self) -> &str {
        self.stage.get().map(String::as_str).unwrap_or("scripted")
    }

    async fn process(
        &self,
        mut item: PipelineItem,
        _ctx: &ProcessingContext,
    ) -> Result<PipelineItem, PluginRuntimeError> {
        let config = self.config.read().clone();

        if config.fail_kind == "permanent" && config.fail_times > 0 {
            return Err(PluginRuntimeError::permanent("scripted permanent failure"));
        }
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PluginRuntimeError::transient("scripted transient failure"));
        }

        if let (Some(marker), Some(listing)) = (&config.marker, item.listing.as_mut()) {
            listing
                .metadata
                .insert("scripted_marker".to_string(), Value::String(marker.clone()));
        }
        Ok(item)
    }
}

#[derive(Debug, Clone)]
struct ScriptedDetectionConfig {
    score: f64,
    weight: f64,
    confidence: f64,
    signal_type: String,
    fail: Option<String>,
    delay_ms: u64,
}

impl Default for ScriptedDetectionConfig {
    fn default() -> Self {
        Self {
            score: 0.0,
            weight: 1.0,
            confidence: 1.0,
            signal_type: "scripted".to_string(),
            fail: None,
            delay_ms: 0,
        }
    }
}

pub struct ScriptedDetection {
    plugin_id: String,
    config: RwLock<ScriptedDetectionConfig>,
}

impl ScriptedDetection {
    pub fn new(plugin_id: String) -> Self {
        Self {
            plugin_id,
            config: RwLock::new(ScriptedDetectionConfig::default()),
        }
    }
}

#[async_trait]
impl Plugin for ScriptedDetection {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        let mut guard = self.config.write();
        if let Some(score) = config.get("score").and_then(Value::as_f64) {
            guard.score = score;
        }
        if let Some(weight) = config.get("weight").and_then(Value::as_f64) {
            guard.weight = weight;
        }
        if let Some(confidence) = config.get("confidence").and_then(Value::as_f64) {
            guard.confidence = confidence;
        }
        if let Some(signal_type) = config.get("signal_type").and_then(Value::as_str) {
            guard.signal_type = signal_type.to_string();
        }
        if let Some(fail) = config.get("fail").and_then(Value::as_str) {
            guard.fail = Some(fail.to_string());
        }
        if let Some(delay) = config.get("delay_ms").and_then(Value::as_u64) {
            guard.delay_ms = delay;
        }
        Ok(())
    }
}

#[async_trait]
impl DetectionPlugin for ScriptedDetection {
    fn default_weight(&self) -> f64 {
        self.config.read().weight
    }

    async fn analyze(
        &self,
        _listing: &NormalizedListing,
        _ctx: &ProcessingContext,
    ) -> Result<DetectionOutcome, PluginRuntimeError> {
        let config = self.config.read().clone();
        if config.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(config.delay_ms)).await;
        }
        match config.fail.as_deref() {
            Some("transient") => {
                return Err(PluginRuntimeError::transient("scripted detector failure"))
            }
            Some("permanent") => {
                return Err(PluginRuntimeError::permanent("scripted detector failure"))
            }
            _ => {}
        }
        let signal = RiskSignal {
            signal_type: config.signal_type.clone(),
            score: config.score,
            confidence: config.confidence,
            plugin_id: self.plugin_id.clone(),
            reason: "scripted detection outcome".to_string(),
            evidence: Default::default(),
        };
        Ok(DetectionOutcome {
            overall_score: config.score,
            confidence: Some(config.confidence),
            signals: vec![signal],
        })
    }
}

/// Build an already-enabled scripted detector entry, for tests that drive
/// the scorer or the pipeline without a manager.
pub async fn enabled_detection(id: &str, config: serde_json::Value) -> Arc<crate::LoadedPlugin> {
    let manifest = scripted_manifest(id, "detection", "ScriptedDetection");
    let instance = ScriptedDetection::new(id.to_string());
    instance
        .configure(&config)
        .await
        .expect("scripted detection config");
    let plugin = Arc::new(crate::LoadedPlugin::new(
        manifest,
        PathBuf::from(format!("/dev/null/{id}/plugin.yaml")),
        PluginInstance::Detection(Arc::new(instance)),
    ));
    plugin.set_state(crate::PluginState::Enabled);
    plugin
}

/// Build an already-enabled scripted processing stage entry.
pub async fn enabled_processing(
    id: &str,
    priority: i32,
    config: serde_json::Value,
) -> Arc<crate::LoadedPlugin> {
    let mut manifest = scripted_manifest(id, "processing", "ScriptedProcessing");
    manifest.priority = Some(priority);
    let instance = ScriptedProcessing::default();
    instance
        .configure(&config)
        .await
        .expect("scripted processing config");
    let plugin = Arc::new(crate::LoadedPlugin::new(
        manifest,
        PathBuf::from(format!("/dev/null/{id}/plugin.yaml")),
        PluginInstance::Processing(Arc::new(instance)),
    ));
    plugin.set_state(crate::PluginState::Enabled);
    plugin
}

/// Build an already-enabled entry around the built-in normalizer.
pub fn enabled_normalizer(priority: i32) -> Arc<crate::LoadedPlugin> {
    let mut manifest = scripted_manifest(
        "plugin-processing-normalizer",
        "processing",
        "ListingNormalizer",
    );
    manifest.priority = Some(priority);
    let plugin = Arc::new(crate::LoadedPlugin::new(
        manifest,
        PathBuf::from("/dev/null/normalizer/plugin.yaml"),
        PluginInstance::Processing(Arc::new(crate::builtin::ListingNormalizer::default())),
    ));
    plugin.set_state(crate::PluginState::Enabled);
    plugin
}

fn scripted_manifest(id: &str, kind: &str, class: &str) -> estateguard_manifest::PluginManifest {
    let doc = format!(
        r#"
id: {id}
name: {id}
version: 1.0.0
kind: {kind}
api_version: "1.0"
description: test-support plugin
entrypoint:
  module: estateguard.testkit
  class: {class}
"#
    );
    estateguard_manifest::PluginManifest::parse(doc.as_bytes()).expect("testkit manifest")
}
