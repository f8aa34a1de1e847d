//! Per-plugin configuration binding.
//!
//! Precedence, lowest first: manifest defaults, then the per-plugin config
//! file the manifest references, then `PLUGIN_<UPPER_SNAKE_ID>_<KEY>`
//! environment variables. The merge is shallow over top-level keys. After
//! merging, `${ENV_VAR}` references in string values are resolved from the
//! environment and the manifest's required keys are checked.

use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use estateguard_manifest::PluginManifest;

use crate::error::PluginError;

lazy_static! {
    static ref SECRET_REF: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("secret reference pattern");
}

/// Merge and validate the configuration for one plugin. `env` is the
/// process environment (injected for testability).
pub fn bind_config(
    manifest: &PluginManifest,
    plugin_dir: &Path,
    env: &HashMap<String, String>,
) -> Result<Value, PluginError> {
    let id = &manifest.id;
    let mut merged: Map<String, Value> = manifest
        .config
        .defaults
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(file) = &manifest.config.file {
        let path = plugin_dir.join(file);
        let text = std::fs::read_to_string(&path).map_err(|e| PluginError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let from_file: Map<String, Value> =
            serde_yaml::from_str(&text).map_err(|e| PluginError::ConfigInvalid {
                id: id.clone(),
                reason: format!("config file `{file}`: {e}"),
            })?;
        merged.extend(from_file);
    }

    let prefix = manifest.env_prefix();
    for (name, raw) in env {
        let Some(key) = name.strip_prefix(&prefix) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        let key = key.to_lowercase();
        // Values that parse as JSON keep their type; everything else is a
        // plain string.
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        merged.insert(key, value);
    }

    let mut value = Value::Object(merged);
    resolve_secrets(id, &mut value, env)?;

    if let Value::Object(map) = &value {
        for key in &manifest.config.required_keys {
            if !map.contains_key(key) {
                return Err(PluginError::MissingConfigKey {
                    id: id.clone(),
                    key: key.clone(),
                });
            }
        }
    }

    Ok(value)
}

fn resolve_secrets(
    id: &str,
    value: &mut Value,
    env: &HashMap<String, String>,
) -> Result<(), PluginError> {
    match value {
        Value::String(s) => {
            if !SECRET_REF.is_match(s) {
                return Ok(());
            }
            let mut resolved = String::with_capacity(s.len());
            let mut cursor = 0;
            for captures in SECRET_REF.captures_iter(s) {
                let whole = captures.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
                let var = &captures[1];
                let replacement = env.get(var).ok_or_else(|| PluginError::UnresolvedSecret {
                    id: id.to_string(),
                    var: var.to_string(),
                })?;
                resolved.push_str(&s[cursor..whole.0]);
                resolved.push_str(replacement);
                cursor = whole.1;
            }
            resolved.push_str(&s[cursor..]);
            *s = resolved;
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                resolve_secrets(id, item, env)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                resolve_secrets(id, item, env)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
