//! The in-memory plugin registry.
//!
//! Read-mostly: the orchestrator and scorer take read locks on every
//! listing; the only writer is the plugin manager during load, reload,
//! enable/disable and unregister. Entries are `Arc`ed so a reload can swap
//! the map slot while in-flight work keeps the instance it started with.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use estateguard_manifest::{PluginKind, Version};

use crate::error::PluginError;
use crate::state::{LoadedPlugin, PluginState};

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<LoadedPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.read().contains_key(id)
    }

    pub fn insert(&self, plugin: Arc<LoadedPlugin>) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write();
        if plugins.contains_key(plugin.id()) {
            return Err(PluginError::DuplicateId(plugin.id().to_string()));
        }
        plugins.insert(plugin.id().to_string(), plugin);
        Ok(())
    }

    /// Atomic replace for hot reload. Readers observe either the old or the
    /// new entry, never an absent one.
    pub fn swap(&self, plugin: Arc<LoadedPlugin>) -> Option<Arc<LoadedPlugin>> {
        self.plugins
            .write()
            .insert(plugin.id().to_string(), plugin)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// All entries, sorted by id for deterministic listings.
    pub fn list(&self, kind: Option<PluginKind>) -> Vec<Arc<LoadedPlugin>> {
        let mut entries: Vec<_> = self
            .plugins
            .read()
            .values()
            .filter(|p| kind.map_or(true, |k| p.manifest.kind == k))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));
        entries
    }

    /// Enabled processing plugins in pipeline order: ascending priority,
    /// ties broken by id.
    pub fn enabled_processing(&self) -> Vec<Arc<LoadedPlugin>> {
        let mut stages: Vec<_> = self
            .plugins
            .read()
            .values()
            .filter(|p| p.is_enabled() && p.instance.as_processing().is_some())
            .cloned()
            .collect();
        stages.sort_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.id().cmp(b.id())));
        stages
    }

    /// Enabled detection plugins, sorted by id so aggregation folds are
    /// deterministic.
    pub fn enabled_detection(&self) -> Vec<Arc<LoadedPlugin>> {
        let mut detectors: Vec<_> = self
            .plugins
            .read()
            .values()
            .filter(|p| p.is_enabled() && p.instance.as_detection().is_some())
            .cloned()
            .collect();
        detectors.sort_by(|a, b| a.id().cmp(b.id()));
        detectors
    }

    /// Loaded versions of every non-failed plugin, the node set for the
    /// dependency graph.
    pub fn versions(&self) -> BTreeMap<String, Version> {
        self.plugins
            .read()
            .values()
            .filter(|p| p.state() != PluginState::Failed)
            .map(|p| (p.id().to_string(), p.manifest.version.clone()))
            .collect()
    }
}
