//! Plugin manifest (`plugin.yaml`) schema and validation.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::error::SchemaError;
use crate::version::Version;

/// Manifest documents larger than this are rejected outright.
pub const MAX_MANIFEST_BYTES: usize = 100 * 1024;

/// The plugin API version this runtime speaks.
pub const PLUGIN_API_VERSION: &str = "1.0";

lazy_static! {
    static ref PLUGIN_ID: Regex =
        Regex::new(r"^plugin-(source|processing|detection|search|display)-[a-z0-9-]+$")
            .expect("plugin id pattern");
}

/// What role a plugin plays in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Source,
    Processing,
    Detection,
    Search,
    Display,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Source => "source",
            PluginKind::Processing => "processing",
            PluginKind::Detection => "detection",
            PluginKind::Search => "search",
            PluginKind::Display => "display",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the plugin implementation lives. The interpretation is up to the
/// host loader; this runtime resolves the pair against a registry of
/// compiled-in factories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryPoint {
    pub module: String,
    pub class: String,
}

/// Version requirements the plugin declares against the core and against
/// other plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestDependencies {
    pub core_version: Option<Constraint>,
    pub language_runtime_version: Option<String>,
    pub plugins: BTreeMap<String, Constraint>,
}

/// Configuration contract: where per-plugin config lives and what it must
/// contain. `defaults` seed the merged config at the lowest precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManifestConfig {
    pub schema: Option<String>,
    pub file: Option<String>,
    pub required_keys: Vec<String>,
    pub defaults: BTreeMap<String, serde_json::Value>,
}

/// Advisory resource requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ResourceHints {
    pub memory_mb: Option<u64>,
    pub cpu_cores: Option<f64>,
    pub disk_mb: Option<u64>,
    pub network: Option<bool>,
}

/// Scripts the manager runs on lifecycle transitions. Paths are relative to
/// the plugin directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LifecycleHooks {
    pub on_load: Option<String>,
    pub on_enable: Option<String>,
    pub on_disable: Option<String>,
    pub on_unload: Option<String>,
}

impl LifecycleHooks {
    pub fn is_empty(&self) -> bool {
        self.on_load.is_none()
            && self.on_enable.is_none()
            && self.on_disable.is_none()
            && self.on_unload.is_none()
    }
}

/// Health-probe declaration for plugins that expose one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthProbe {
    pub endpoint: String,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_retries")]
    pub retries: u32,
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_health_retries() -> u32 {
    3
}

/// A fully parsed and schema-validated `plugin.yaml`.
///
/// Immutable per load; hot reload re-reads the document and produces a new
/// manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: Version,
    pub kind: PluginKind,
    pub api_version: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<EntryPoint>,
    #[serde(default)]
    pub dependencies: ManifestDependencies,
    #[serde(default)]
    pub config: ManifestConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceHints>,
    #[serde(default)]
    pub hooks: LifecycleHooks,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthProbe>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compatibility: BTreeMap<String, String>,
    /// Pipeline position hint for processing plugins; lower runs earlier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Aggregation weight hint for detection plugins, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl PluginManifest {
    /// Parse a manifest document (YAML, which subsumes the JSON form) and
    /// validate it against the schema.
    pub fn parse(bytes: &[u8]) -> Result<Self, SchemaError> {
        if bytes.len() > MAX_MANIFEST_BYTES {
            return Err(SchemaError::document(format!(
                "manifest is {} bytes, limit is {MAX_MANIFEST_BYTES}",
                bytes.len()
            )));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| SchemaError::document("manifest is not valid UTF-8"))?;
        let manifest: PluginManifest =
            serde_yaml::from_str(text).map_err(schema_error_from_yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Re-emit the manifest as YAML. Parsing the output yields an equal
    /// manifest.
    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        serde_yaml::to_string(self).map_err(|e| SchemaError::document(e.to_string()))
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if !PLUGIN_ID.is_match(&self.id) {
            return Err(SchemaError::new(
                "id",
                format!(
                    "`{}` does not match `plugin-{{kind}}-{{slug}}` with kind in \
                     source|processing|detection|search|display",
                    self.id
                ),
            ));
        }
        let id_kind = self
            .id
            .split('-')
            .nth(1)
            .unwrap_or_default();
        if id_kind != self.kind.as_str() {
            return Err(SchemaError::new(
                "kind",
                format!("id declares kind `{id_kind}` but kind field is `{}`", self.kind),
            ));
        }
        if self.api_version != PLUGIN_API_VERSION {
            return Err(SchemaError::new(
                "api_version",
                format!(
                    "`{}` is not supported by this runtime (expected `{PLUGIN_API_VERSION}`)",
                    self.api_version
                ),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(SchemaError::new("name", "must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(SchemaError::new("description", "must not be empty"));
        }
        if let Some(weight) = self.weight {
            if !(0.0..=1.0).contains(&weight) {
                return Err(SchemaError::new(
                    "weight",
                    format!("{weight} is outside [0, 1]"),
                ));
            }
        }
        for dep_id in self.dependencies.plugins.keys() {
            if !PLUGIN_ID.is_match(dep_id) {
                return Err(SchemaError::new(
                    "dependencies.plugins",
                    format!("`{dep_id}` is not a valid plugin id"),
                ));
            }
            if dep_id == &self.id {
                return Err(SchemaError::new(
                    "dependencies.plugins",
                    "a plugin cannot depend on itself",
                ));
            }
        }
        if let Some(entry) = &self.entrypoint {
            if entry.module.trim().is_empty() || entry.class.trim().is_empty() {
                return Err(SchemaError::new(
                    "entrypoint",
                    "module and class must be non-empty",
                ));
            }
        }
        Ok(())
    }

    /// Environment-variable prefix for this plugin's config overrides:
    /// the id upper-snake-cased, e.g. `plugin-detection-price-anomaly`
    /// becomes `PLUGIN_DETECTION_PRICE_ANOMALY_`.
    pub fn env_prefix(&self) -> String {
        let mut prefix = self.id.replace('-', "_").to_uppercase();
        prefix.push('_');
        prefix
    }
}

/// Entry point for callers that hold raw bytes rather than a manifest value.
pub fn parse_manifest(bytes: &[u8]) -> Result<PluginManifest, SchemaError> {
    PluginManifest::parse(bytes)
}

fn schema_error_from_yaml(err: serde_yaml::Error) -> SchemaError {
    // serde_yaml reports unknown/missing/ill-typed fields in its message;
    // pull the field name out when the message carries one.
    let message = err.to_string();
    let field = message
        .split('`')
        .nth(1)
        .filter(|f| !f.is_empty())
        .unwrap_or("(document)")
        .to_string();
    SchemaError { field, reason: message }
}
