//! The plugin manager: single authority for the plugin lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};
use walkdir::WalkDir;

use estateguard_graph::{DependencyEdge, DependencyGraph};
use estateguard_manifest::{PluginKind, PluginManifest, Version};

use crate::binding::bind_config;
use crate::error::PluginError;
use crate::factory::EntrypointRegistry;
use crate::hooks::run_hook;
use crate::registry::PluginRegistry;
use crate::state::{LoadedPlugin, PluginState};

/// Manager configuration. Defaults match the documented deadlines: 5s for
/// instance shutdown during reload, 60s for hook scripts.
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    /// Directory scanned recursively for `plugin.yaml` documents.
    pub root_dir: PathBuf,
    /// The core version plugins declare constraints against.
    pub core_version: Version,
    pub shutdown_deadline: Duration,
    pub hook_timeout: Duration,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./plugins"),
            core_version: Version::parse(env!("CARGO_PKG_VERSION"))
                .unwrap_or_else(|_| Version::new(0, 1, 0)),
            shutdown_deadline: Duration::from_secs(5),
            hook_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a batch load: ids that made it into the registry, and
/// per-manifest failures. A single failure never aborts the batch.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, PluginError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    Loaded,
    Configured,
    Enabled,
    Disabled,
    Reloaded,
    Failed,
    Unregistered,
}

/// Emitted on every lifecycle transition, for the admin surface and tests.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub plugin_id: String,
    pub kind: LifecycleEventKind,
    pub message: Option<String>,
}

pub struct PluginManager {
    config: PluginManagerConfig,
    registry: Arc<PluginRegistry>,
    entrypoints: EntrypointRegistry,
    graph: RwLock<Option<DependencyGraph>>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    /// Environment snapshot used for config binding; injectable for tests.
    env: HashMap<String, String>,
}

impl PluginManager {
    pub fn new(config: PluginManagerConfig, entrypoints: EntrypointRegistry) -> Self {
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            config,
            registry: Arc::new(PluginRegistry::new()),
            entrypoints,
            graph: RwLock::new(None),
            lifecycle,
            env: std::env::vars().collect(),
        }
    }

    /// Replace the environment snapshot used for configuration binding.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub fn graph(&self) -> Option<DependencyGraph> {
        self.graph.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.registry.get(id)
    }

    pub fn list(&self, kind: Option<PluginKind>) -> Vec<Arc<LoadedPlugin>> {
        self.registry.list(kind)
    }

    /// Recursive scan of the root directory for `plugin.yaml` documents,
    /// sorted for deterministic load order.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut manifests: Vec<PathBuf> = WalkDir::new(&self.config.root_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry during discovery");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name() == "plugin.yaml")
            .map(|entry| entry.into_path())
            .collect();
        manifests.sort();
        info!(
            root = %self.config.root_dir.display(),
            count = manifests.len(),
            "plugin discovery complete"
        );
        manifests
    }

    /// Discover and load everything under the root directory.
    pub async fn load_all(&self) -> LoadReport {
        let manifests = self.discover();
        self.load(manifests).await
    }

    /// Load a batch of manifests: validate, instantiate and register each,
    /// then rebuild the dependency graph and configure the survivors.
    /// Failures are accumulated per manifest.
    pub async fn load(&self, manifest_paths: Vec<PathBuf>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut staged: Vec<Arc<LoadedPlugin>> = Vec::new();

        for path in manifest_paths {
            match self.instantiate(&path).await {
                Ok(plugin) => {
                    info!(plugin = plugin.id(), version = %plugin.manifest.version, "plugin registered");
                    self.emit(plugin.id(), LifecycleEventKind::Loaded, None);
                    staged.push(plugin);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "plugin load failed");
                    report.failed.push((path, err));
                }
            }
        }

        for plugin in &staged {
            if let Err(err) = self.registry.insert(Arc::clone(plugin)) {
                warn!(plugin = plugin.id(), error = %err, "plugin registration failed");
                report.failed.push((plugin.manifest_path.clone(), err));
            }
        }

        // With the whole batch instantiated, validate the dependency graph.
        // Plugins whose dependencies do not resolve are demoted and removed;
        // the rest proceed to configuration.
        for (id, err) in self.rebuild_graph() {
            let path = staged
                .iter()
                .find(|p| p.id() == id)
                .map(|p| p.manifest_path.clone())
                .unwrap_or_default();
            self.emit(&id, LifecycleEventKind::Failed, Some(err.to_string()));
            report.failed.push((path, PluginError::Dependency(err)));
        }

        for plugin in staged {
            if !self.registry.contains(plugin.id()) {
                continue;
            }
            match self.configure(&plugin).await {
                Ok(()) => report.loaded.push(plugin.id().to_string()),
                Err(err) => {
                    warn!(plugin = plugin.id(), error = %err, "plugin configuration failed");
                    plugin.set_state(PluginState::Failed);
                    self.emit(plugin.id(), LifecycleEventKind::Failed, Some(err.to_string()));
                    report.failed.push((plugin.manifest_path.clone(), err));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "plugin load batch complete"
        );
        report
    }

    /// Load a single manifest, for the admin register endpoint.
    pub async fn register_manifest(&self, path: &Path) -> Result<Arc<LoadedPlugin>, PluginError> {
        let id_hint = path.to_path_buf();
        let mut report = self.load(vec![id_hint]).await;
        if let Some(id) = report.loaded.first() {
            return self
                .registry
                .get(id)
                .ok_or_else(|| PluginError::UnknownPlugin(id.clone()));
        }
        match report.failed.pop() {
            Some((_, err)) => Err(err),
            None => Err(PluginError::Io {
                path: path.display().to_string(),
                reason: "manifest produced neither a plugin nor an error".to_string(),
            }),
        }
    }

    /// Enable a plugin: run its `on_enable` hook script and lifecycle
    /// method. A hook or lifecycle failure drives the plugin to `Failed`.
    pub async fn enable(&self, id: &str) -> Result<(), PluginError> {
        let plugin = self.require(id)?;
        match plugin.state() {
            PluginState::Configured | PluginState::Disabled => {}
            PluginState::Enabled => return Ok(()),
            state => {
                return Err(PluginError::InvalidState {
                    id: id.to_string(),
                    state: state.to_string(),
                    expected: "configured or disabled".to_string(),
                });
            }
        }

        if let Err(err) = self.run_lifecycle(&plugin, "on_enable").await {
            plugin.set_state(PluginState::Failed);
            self.emit(id, LifecycleEventKind::Failed, Some(err.to_string()));
            return Err(err);
        }

        plugin.set_state(PluginState::Enabled);
        info!(plugin = id, "plugin enabled");
        self.emit(id, LifecycleEventKind::Enabled, None);
        Ok(())
    }

    /// Disable a plugin; it stays registered and configured.
    pub async fn disable(&self, id: &str) -> Result<(), PluginError> {
        let plugin = self.require(id)?;
        match plugin.state() {
            PluginState::Enabled => {}
            PluginState::Disabled => return Ok(()),
            state => {
                return Err(PluginError::InvalidState {
                    id: id.to_string(),
                    state: state.to_string(),
                    expected: "enabled".to_string(),
                });
            }
        }

        if let Err(err) = self.run_lifecycle(&plugin, "on_disable").await {
            plugin.set_state(PluginState::Failed);
            self.emit(id, LifecycleEventKind::Failed, Some(err.to_string()));
            return Err(err);
        }

        plugin.set_state(PluginState::Disabled);
        info!(plugin = id, "plugin disabled");
        self.emit(id, LifecycleEventKind::Disabled, None);
        Ok(())
    }

    /// Hot reload. The old instance keeps serving until the replacement is
    /// fully ready; any failure leaves the registry untouched.
    ///
    /// 1. Shut the old instance down, bounded by the shutdown deadline.
    /// 2. Re-read the manifest.
    /// 3. Resolve the entrypoint.
    /// 4. Instantiate and configure the replacement.
    /// 5. Re-validate dependencies, then swap the registry entry atomically.
    pub async fn reload(&self, id: &str) -> Result<Arc<LoadedPlugin>, PluginError> {
        let old = self.require(id)?;
        info!(plugin = id, "reloading plugin");

        // Step 1: bounded shutdown of the old instance.
        match tokio::time::timeout(self.config.shutdown_deadline, old.instance.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(PluginError::LifecycleFailed {
                    id: id.to_string(),
                    reason: format!("shutdown failed: {err}"),
                });
            }
            Err(_) => {
                return Err(PluginError::ShutdownTimeout {
                    id: id.to_string(),
                    seconds: self.config.shutdown_deadline.as_secs(),
                });
            }
        }

        // Steps 2-4: build the replacement off to the side.
        let replacement = self.instantiate(&old.manifest_path).await?;
        if replacement.id() != id {
            return Err(PluginError::ConfigInvalid {
                id: id.to_string(),
                reason: format!(
                    "manifest now declares id `{}`; unregister and load it as a new plugin",
                    replacement.id()
                ),
            });
        }
        self.configure(&replacement).await?;

        // Step 5: full dependency re-validation with the new manifest in
        // place of the old one, then the atomic swap.
        let (nodes, edges) = self.graph_inputs(Some(&replacement.manifest));
        let graph = DependencyGraph::build(nodes, edges).map_err(PluginError::Dependency)?;

        let was_enabled = old.state() == PluginState::Enabled;
        if was_enabled {
            if let Err(err) = self.run_lifecycle(&replacement, "on_enable").await {
                // The replacement never enters the registry; the old
                // instance remains the live one.
                return Err(err);
            }
            replacement.set_state(PluginState::Enabled);
        }

        self.registry.swap(Arc::clone(&replacement));
        *self.graph.write() = Some(graph);
        info!(plugin = id, version = %replacement.manifest.version, "plugin reloaded");
        self.emit(id, LifecycleEventKind::Reloaded, None);
        Ok(replacement)
    }

    /// Remove a plugin entirely: disable if needed, run its unload hook,
    /// shut the instance down, drop it from the registry and re-validate
    /// the graph for its dependents.
    pub async fn unregister(&self, id: &str) -> Result<(), PluginError> {
        let plugin = self.require(id)?;

        if plugin.state() == PluginState::Enabled {
            if let Err(err) = self.run_lifecycle(&plugin, "on_disable").await {
                warn!(plugin = id, error = %err, "on_disable failed during unregister");
            }
        }
        if let Some(script) = plugin.manifest.hooks.on_unload.clone() {
            if let Err(err) = run_hook(
                id,
                "on_unload",
                &script,
                &plugin.plugin_dir,
                self.config.hook_timeout,
            )
            .await
            {
                warn!(plugin = id, error = %err, "on_unload hook failed");
            }
        }
        match tokio::time::timeout(self.config.shutdown_deadline, plugin.instance.shutdown()).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(plugin = id, error = %err, "shutdown failed during unregister"),
            Err(_) => warn!(plugin = id, "shutdown timed out during unregister"),
        }

        self.registry.remove(id);
        for (demoted, err) in self.rebuild_graph() {
            warn!(plugin = %demoted, error = %err, "dependent plugin failed after unregister");
            self.emit(&demoted, LifecycleEventKind::Failed, Some(err.to_string()));
        }
        info!(plugin = id, "plugin unregistered");
        self.emit(id, LifecycleEventKind::Unregistered, None);
        Ok(())
    }

    /// Enable every configured plugin in dependency order. Returns the
    /// failures; a failed enable never stops the sweep.
    pub async fn enable_all(&self) -> Vec<(String, PluginError)> {
        let order: Vec<String> = match self.graph() {
            Some(graph) => graph.topo_order().to_vec(),
            None => self.registry.list(None).iter().map(|p| p.id().to_string()).collect(),
        };
        let mut failures = Vec::new();
        for id in order {
            let Some(plugin) = self.registry.get(&id) else { continue };
            if plugin.state() != PluginState::Configured {
                continue;
            }
            if let Err(err) = self.enable(&id).await {
                failures.push((id, err));
            }
        }
        failures
    }

    /// Shut every plugin down in reverse dependency order, for process
    /// shutdown.
    pub async fn shutdown_all(&self) {
        let order: Vec<String> = match self.graph() {
            Some(graph) => graph.topo_order().iter().rev().cloned().collect(),
            None => self.registry.list(None).iter().map(|p| p.id().to_string()).collect(),
        };
        for id in order {
            let Some(plugin) = self.registry.get(&id) else { continue };
            match tokio::time::timeout(self.config.shutdown_deadline, plugin.instance.shutdown())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(plugin = %id, error = %err, "plugin shutdown failed"),
                Err(_) => warn!(plugin = %id, "plugin shutdown timed out"),
            }
        }
    }

    fn require(&self, id: &str) -> Result<Arc<LoadedPlugin>, PluginError> {
        self.registry
            .get(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))
    }

    fn emit(&self, plugin_id: &str, kind: LifecycleEventKind, message: Option<String>) {
        let _ = self.lifecycle.send(LifecycleEvent {
            plugin_id: plugin_id.to_string(),
            kind,
            message,
        });
    }

    /// Read, validate and instantiate one manifest. The plugin is returned
    /// in `Registered` state, not yet in the registry.
    async fn instantiate(&self, path: &Path) -> Result<Arc<LoadedPlugin>, PluginError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| PluginError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let manifest = PluginManifest::parse(&bytes)?;

        if let Some(required) = &manifest.dependencies.core_version {
            if !required.matches(&self.config.core_version) {
                return Err(PluginError::CoreVersionMismatch {
                    id: manifest.id.clone(),
                    required: required.to_string(),
                    actual: self.config.core_version.to_string(),
                });
            }
        }

        let instance = self.entrypoints.resolve(&manifest)?;
        if !instance.implements(manifest.kind) {
            return Err(PluginError::KindMismatch {
                id: manifest.id.clone(),
                declared: manifest.kind.to_string(),
                actual: instance.kind_name().to_string(),
            });
        }

        let plugin = Arc::new(LoadedPlugin::new(manifest, path.to_path_buf(), instance));

        if let Some(script) = plugin.manifest.hooks.on_load.clone() {
            run_hook(
                plugin.id(),
                "on_load",
                &script,
                &plugin.plugin_dir,
                self.config.hook_timeout,
            )
            .await?;
        }

        Ok(plugin)
    }

    /// Bind and apply configuration, moving the plugin to `Configured`.
    async fn configure(&self, plugin: &Arc<LoadedPlugin>) -> Result<(), PluginError> {
        let config = bind_config(&plugin.manifest, &plugin.plugin_dir, &self.env)?;
        plugin
            .instance
            .configure(&config)
            .await
            .map_err(|err| PluginError::ConfigInvalid {
                id: plugin.id().to_string(),
                reason: err.to_string(),
            })?;
        plugin.set_state(PluginState::Configured);
        self.emit(plugin.id(), LifecycleEventKind::Configured, None);
        Ok(())
    }

    /// Hook script plus instance lifecycle method for one transition.
    async fn run_lifecycle(&self, plugin: &Arc<LoadedPlugin>, hook: &str) -> Result<(), PluginError> {
        let script = match hook {
            "on_enable" => plugin.manifest.hooks.on_enable.clone(),
            "on_disable" => plugin.manifest.hooks.on_disable.clone(),
            _ => None,
        };
        if let Some(script) = script {
            run_hook(
                plugin.id(),
                hook,
                &script,
                &plugin.plugin_dir,
                self.config.hook_timeout,
            )
            .await?;
        }
        let result = match hook {
            "on_enable" => plugin.instance.on_enable().await,
            "on_disable" => plugin.instance.on_disable().await,
            _ => Ok(()),
        };
        result.map_err(|err| PluginError::LifecycleFailed {
            id: plugin.id().to_string(),
            reason: format!("{hook}: {err}"),
        })
    }

    /// Node and edge inputs for a graph build over the current registry,
    /// optionally substituting one manifest (for reload validation).
    fn graph_inputs(
        &self,
        replace: Option<&PluginManifest>,
    ) -> (
        BTreeMap<String, Version>,
        BTreeMap<String, Vec<DependencyEdge>>,
    ) {
        let mut nodes = self.registry.versions();
        let mut edges: BTreeMap<String, Vec<DependencyEdge>> = BTreeMap::new();

        for plugin in self.registry.list(None) {
            if plugin.state() == PluginState::Failed {
                continue;
            }
            let manifest = match replace {
                Some(replacement) if replacement.id == plugin.id() => replacement,
                _ => &plugin.manifest,
            };
            let declared: Vec<DependencyEdge> = manifest
                .dependencies
                .plugins
                .iter()
                .map(|(dep, constraint)| DependencyEdge {
                    dependency: dep.clone(),
                    constraint: constraint.clone(),
                })
                .collect();
            if !declared.is_empty() {
                edges.insert(manifest.id.clone(), declared);
            }
        }

        if let Some(replacement) = replace {
            nodes.insert(replacement.id.clone(), replacement.version.clone());
        }
        (nodes, edges)
    }

    /// Rebuild the graph over the current registry. Plugins whose
    /// dependencies fail validation are removed from the registry, one per
    /// iteration, until the graph builds. Returns the demoted set.
    fn rebuild_graph(&self) -> Vec<(String, estateguard_graph::GraphError)> {
        let mut demoted = Vec::new();
        loop {
            let (nodes, edges) = self.graph_inputs(None);
            match DependencyGraph::build(nodes, edges) {
                Ok(graph) => {
                    *self.graph.write() = Some(graph);
                    return demoted;
                }
                Err(err) => {
                    let offender = err.offender().to_string();
                    if offender.is_empty() {
                        // Cannot attribute the failure; keep the previous
                        // graph rather than loop forever.
                        warn!(error = %err, "dependency graph rebuild failed without an offender");
                        return demoted;
                    }
                    if let Some(plugin) = self.registry.remove(&offender) {
                        plugin.set_state(PluginState::Failed);
                    }
                    demoted.push((offender, err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_plugin(root: &Path, dir: &str, manifest: &str) -> PathBuf {
        let plugin_dir = root.join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let path = plugin_dir.join("plugin.yaml");
        std::fs::write(&path, manifest).unwrap();
        path
    }

    fn manager(root: &Path) -> PluginManager {
        PluginManager::new(
            PluginManagerConfig {
                root_dir: root.to_path_buf(),
                core_version: Version::new(0, 1, 0),
                shutdown_deadline: Duration::from_millis(500),
                hook_timeout: Duration::from_secs(2),
            },
            EntrypointRegistry::with_builtins(),
        )
        .with_env(HashMap::new())
    }

    const NORMALIZER: &str = r#"
id: plugin-processing-normalizer
name: Normalizer
version: 1.2.0
kind: processing
api_version: "1.0"
description: maps raw scrapes into the canonical model
entrypoint:
  module: estateguard.builtin
  class: ListingNormalizer
priority: 1
"#;

    const DETECTOR: &str = r#"
id: plugin-detection-price-anomaly
name: Price Anomaly
version: 2.0.0
kind: detection
api_version: "1.0"
description: flags underpriced listings
entrypoint:
  module: estateguard.builtin
  class: PriceAnomalyDetection
dependencies:
  plugins:
    plugin-processing-normalizer: "^1.0.0"
"#;

    #[tokio::test]
    async fn discovery_and_batch_load() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "normalizer", NORMALIZER);
        write_plugin(root.path(), "detector", DETECTOR);
        write_plugin(root.path(), "broken", "id: nonsense\n");

        let manager = manager(root.path());
        assert_eq!(manager.discover().len(), 3);

        let report = manager.load_all().await;
        assert_eq!(report.loaded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, PluginError::Manifest(_)));

        let detector = manager.get("plugin-detection-price-anomaly").unwrap();
        assert_eq!(detector.state(), PluginState::Configured);

        // Dependency order puts the normalizer first.
        let graph = manager.graph().unwrap();
        assert_eq!(
            graph.topo_order(),
            &[
                "plugin-processing-normalizer".to_string(),
                "plugin-detection-price-anomaly".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn version_incompatibility_demotes_only_the_dependent() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(
            root.path(),
            "normalizer",
            &NORMALIZER.replace("version: 1.2.0", "version: 1.5.0"),
        );
        write_plugin(
            root.path(),
            "detector",
            &DETECTOR.replace("\"^1.0.0\"", "\"^2.0.0\""),
        );

        let manager = manager(root.path());
        let report = manager.load_all().await;

        assert_eq!(report.loaded, vec!["plugin-processing-normalizer".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0].1,
            PluginError::Dependency(estateguard_graph::GraphError::VersionIncompatibility { .. })
        ));
        // The dependent is gone, the dependency stays loaded.
        assert!(manager.get("plugin-detection-price-anomaly").is_none());
        assert!(manager.get("plugin-processing-normalizer").is_some());
        assert!(manager.graph().unwrap().contains("plugin-processing-normalizer"));
    }

    #[tokio::test]
    async fn enable_disable_round_trip() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "normalizer", NORMALIZER);
        let manager = manager(root.path());
        manager.load_all().await;

        manager.enable("plugin-processing-normalizer").await.unwrap();
        assert!(manager.get("plugin-processing-normalizer").unwrap().is_enabled());

        // Enabling an enabled plugin is a no-op, not an error.
        manager.enable("plugin-processing-normalizer").await.unwrap();

        manager.disable("plugin-processing-normalizer").await.unwrap();
        assert_eq!(
            manager.get("plugin-processing-normalizer").unwrap().state(),
            PluginState::Disabled
        );

        let err = manager.disable("plugin-processing-ghost").await.unwrap_err();
        assert!(matches!(err, PluginError::UnknownPlugin(_)));
    }

    #[tokio::test]
    async fn reload_swaps_the_instance_and_calls_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("marker.txt");
        let manifest = format!(
            r#"
id: plugin-processing-scripted
name: Scripted
version: 1.0.0
kind: processing
api_version: "1.0"
description: scripted stage
entrypoint:
  module: estateguard.testkit
  class: ScriptedProcessing
config:
  defaults:
    stage: scripted
    marker: generation-one
    shutdown_marker: "{}"
"#,
            marker.display()
        );
        let manifest_path = write_plugin(root.path(), "scripted", &manifest);

        let manager = manager(root.path());
        let report = manager.load_all().await;
        assert_eq!(report.loaded.len(), 1);
        manager.enable("plugin-processing-scripted").await.unwrap();
        let before = manager.get("plugin-processing-scripted").unwrap();

        // New implementation generation: same id, new version and marker.
        std::fs::write(
            &manifest_path,
            manifest
                .replace("version: 1.0.0", "version: 1.1.0")
                .replace("generation-one", "generation-two"),
        )
        .unwrap();

        let reloaded = manager.reload("plugin-processing-scripted").await.unwrap();
        assert_eq!(reloaded.manifest.version, Version::new(1, 1, 0));
        assert!(reloaded.is_enabled());
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "closed");

        // The registry now serves the new instance.
        let after = manager.get("plugin-processing-scripted").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&reloaded, &after));
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_old_instance() {
        let root = tempfile::tempdir().unwrap();
        let path = write_plugin(root.path(), "normalizer", NORMALIZER);
        let manager = manager(root.path());
        manager.load_all().await;
        manager.enable("plugin-processing-normalizer").await.unwrap();
        let before = manager.get("plugin-processing-normalizer").unwrap();

        std::fs::write(&path, "id: broken\n").unwrap();
        let err = manager.reload("plugin-processing-normalizer").await.unwrap_err();
        assert!(matches!(err, PluginError::Manifest(_)));

        let after = manager.get("plugin-processing-normalizer").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_enabled());
    }

    #[tokio::test]
    async fn unregister_cascades_to_dependents() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "normalizer", NORMALIZER);
        write_plugin(root.path(), "detector", DETECTOR);
        let manager = manager(root.path());
        manager.load_all().await;

        manager.unregister("plugin-processing-normalizer").await.unwrap();
        assert!(manager.get("plugin-processing-normalizer").is_none());
        // The detector depended on the normalizer and is demoted with it.
        assert!(manager.get("plugin-detection-price-anomaly").is_none());
    }
}
