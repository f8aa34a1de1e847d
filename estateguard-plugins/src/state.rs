//! Loaded-plugin state: the live instance, its lifecycle state, and the
//! registry-facing snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use estateguard_manifest::{PluginKind, PluginManifest};

use crate::stats::{PluginStats, PluginStatsSnapshot};
use crate::traits::{DetectionPlugin, Plugin, ProcessingPlugin, SourcePlugin};

/// Lifecycle state of a loaded plugin. Only `Enabled` plugins participate
/// in processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Registered,
    Configured,
    Enabled,
    Disabled,
    Failed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginState::Registered => "registered",
            PluginState::Configured => "configured",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The live instance behind a registry entry, tagged by kind. Search and
/// display plugins participate in lifecycle only, so they carry the base
/// contract.
#[derive(Clone)]
pub enum PluginInstance {
    Source(Arc<dyn SourcePlugin>),
    Processing(Arc<dyn ProcessingPlugin>),
    Detection(Arc<dyn DetectionPlugin>),
    Other(Arc<dyn Plugin>),
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PluginInstance").field(&self.kind_name()).finish()
    }
}

impl PluginInstance {
    /// The kind this instance actually implements, for manifest agreement
    /// checks. `Other` accepts both registry-level kinds.
    pub fn implements(&self, kind: PluginKind) -> bool {
        match self {
            PluginInstance::Source(_) => kind == PluginKind::Source,
            PluginInstance::Processing(_) => kind == PluginKind::Processing,
            PluginInstance::Detection(_) => kind == PluginKind::Detection,
            PluginInstance::Other(_) => {
                matches!(kind, PluginKind::Search | PluginKind::Display)
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PluginInstance::Source(_) => "source",
            PluginInstance::Processing(_) => "processing",
            PluginInstance::Detection(_) => "detection",
            PluginInstance::Other(_) => "search/display",
        }
    }

    pub fn as_processing(&self) -> Option<&Arc<dyn ProcessingPlugin>> {
        match self {
            PluginInstance::Processing(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_detection(&self) -> Option<&Arc<dyn DetectionPlugin>> {
        match self {
            PluginInstance::Detection(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<&Arc<dyn SourcePlugin>> {
        match self {
            PluginInstance::Source(p) => Some(p),
            _ => None,
        }
    }

    pub async fn configure(&self, config: &serde_json::Value) -> anyhow::Result<()> {
        match self {
            PluginInstance::Source(p) => p.configure(config).await,
            PluginInstance::Processing(p) => p.configure(config).await,
            PluginInstance::Detection(p) => p.configure(config).await,
            PluginInstance::Other(p) => p.configure(config).await,
        }
    }

    pub async fn on_enable(&self) -> anyhow::Result<()> {
        match self {
            PluginInstance::Source(p) => p.on_enable().await,
            PluginInstance::Processing(p) => p.on_enable().await,
            PluginInstance::Detection(p) => p.on_enable().await,
            PluginInstance::Other(p) => p.on_enable().await,
        }
    }

    pub async fn on_disable(&self) -> anyhow::Result<()> {
        match self {
            PluginInstance::Source(p) => p.on_disable().await,
            PluginInstance::Processing(p) => p.on_disable().await,
            PluginInstance::Detection(p) => p.on_disable().await,
            PluginInstance::Other(p) => p.on_disable().await,
        }
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        match self {
            PluginInstance::Source(p) => p.shutdown().await,
            PluginInstance::Processing(p) => p.shutdown().await,
            PluginInstance::Detection(p) => p.shutdown().await,
            PluginInstance::Other(p) => p.shutdown().await,
        }
    }
}

/// One registry entry: manifest, live instance, lifecycle state and
/// counters. At most one exists per plugin id; hot reload swaps the whole
/// entry atomically.
#[derive(Debug)]
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    pub manifest_path: PathBuf,
    pub plugin_dir: PathBuf,
    pub instance: PluginInstance,
    state: RwLock<PluginState>,
    pub stats: PluginStats,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedPlugin {
    pub fn new(
        manifest: PluginManifest,
        manifest_path: PathBuf,
        instance: PluginInstance,
    ) -> Self {
        let plugin_dir = manifest_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            manifest,
            manifest_path,
            plugin_dir,
            instance,
            state: RwLock::new(PluginState::Registered),
            stats: PluginStats::default(),
            loaded_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: PluginState) {
        *self.state.write() = state;
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == PluginState::Enabled
    }

    /// Pipeline position: manifest hint first, then the instance default.
    pub fn priority(&self) -> i32 {
        self.manifest.priority.unwrap_or_else(|| {
            self.instance
                .as_processing()
                .map(|p| p.default_priority())
                .unwrap_or(100)
        })
    }

    /// Aggregation weight in `[0, 1]`: manifest hint first, then the
    /// instance default.
    pub fn weight(&self) -> f64 {
        let weight = self.manifest.weight.unwrap_or_else(|| {
            self.instance
                .as_detection()
                .map(|p| p.default_weight())
                .unwrap_or(1.0)
        });
        weight.clamp(0.0, 1.0)
    }

    pub fn record_execution(&self, duration: Duration, ok: bool) {
        self.stats.record(duration, ok);
    }

    pub fn snapshot(&self) -> PluginRecord {
        PluginRecord {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.to_string(),
            kind: self.manifest.kind,
            state: self.state(),
            priority: self.priority(),
            weight: self.weight(),
            capabilities: self.manifest.capabilities.clone(),
            tags: self.manifest.tags.clone(),
            loaded_at: self.loaded_at,
            stats: self.stats.snapshot(),
        }
    }
}

/// Serializable view of a loaded plugin, returned by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    pub state: PluginState,
    pub priority: i32,
    pub weight: f64,
    pub capabilities: Vec<String>,
    pub tags: Vec<String>,
    pub loaded_at: DateTime<Utc>,
    pub stats: PluginStatsSnapshot,
}
