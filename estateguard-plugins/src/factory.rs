//! Compiled-in entrypoint resolution.
//!
//! The manifest names a `(module, class)` pair; this registry maps the pair
//! to a constructor baked into the binary. A runtime without dynamic code
//! loading selects among compiled-in factories instead of importing code at
//! runtime, so an unknown module or class is a load error for that plugin
//! and nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use estateguard_manifest::PluginManifest;

use crate::error::PluginError;
use crate::state::PluginInstance;

/// Builds a plugin instance from its manifest. Constructors receive the
/// manifest so a plugin can capture its own id or defaults.
pub type PluginConstructor =
    Arc<dyn Fn(&PluginManifest) -> Result<PluginInstance, PluginError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct EntrypointRegistry {
    factories: HashMap<(String, String), PluginConstructor>,
}

impl EntrypointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in and test-support plugin registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry);
        crate::testkit::register_testkit(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, module: &str, class: &str, constructor: F)
    where
        F: Fn(&PluginManifest) -> Result<PluginInstance, PluginError> + Send + Sync + 'static,
    {
        self.factories
            .insert((module.to_string(), class.to_string()), Arc::new(constructor));
    }

    /// Resolve a manifest's entrypoint and construct the instance.
    pub fn resolve(&self, manifest: &PluginManifest) -> Result<PluginInstance, PluginError> {
        let entry = manifest
            .entrypoint
            .as_ref()
            .ok_or_else(|| PluginError::MissingEntrypoint {
                id: manifest.id.clone(),
            })?;

        let key = (entry.module.clone(), entry.class.clone());
        match self.factories.get(&key) {
            Some(constructor) => constructor(manifest),
            None => {
                let module_known = self
                    .factories
                    .keys()
                    .any(|(module, _)| module == &entry.module);
                if module_known {
                    Err(PluginError::ClassNotFound {
                        id: manifest.id.clone(),
                        module: entry.module.clone(),
                        class: entry.class.clone(),
                    })
                } else {
                    Err(PluginError::ModuleNotFound {
                        id: manifest.id.clone(),
                        module: entry.module.clone(),
                    })
                }
            }
        }
    }
}
