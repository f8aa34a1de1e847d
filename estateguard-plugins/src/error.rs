//! Error types for the plugin system.

use thiserror::Error;

use estateguard_graph::GraphError;
use estateguard_manifest::SchemaError;

/// Load, lifecycle and configuration failures. Everything here concerns a
/// single plugin; the batch operations accumulate these instead of
/// aborting.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Manifest(#[from] SchemaError),

    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),

    #[error("plugin id `{0}` is already registered")]
    DuplicateId(String),

    #[error("plugin `{id}` requires core {required}, but this runtime is {actual}")]
    CoreVersionMismatch {
        id: String,
        required: String,
        actual: String,
    },

    #[error("plugin `{id}` declares no entrypoint")]
    MissingEntrypoint { id: String },

    #[error("plugin `{id}`: entrypoint module `{module}` is not registered")]
    ModuleNotFound { id: String, module: String },

    #[error("plugin `{id}`: entrypoint class `{class}` not found in module `{module}`")]
    ClassNotFound {
        id: String,
        module: String,
        class: String,
    },

    #[error("plugin `{id}`: constructor failed: {reason}")]
    ConstructorFailed { id: String, reason: String },

    #[error("plugin `{id}`: entrypoint builds a {actual} plugin but the manifest declares kind {declared}")]
    KindMismatch {
        id: String,
        declared: String,
        actual: String,
    },

    #[error("plugin `{id}`: configuration invalid: {reason}")]
    ConfigInvalid { id: String, reason: String },

    #[error("plugin `{id}`: required config key `{key}` is missing")]
    MissingConfigKey { id: String, key: String },

    #[error("plugin `{id}`: config references `${{{var}}}`, which is not set in the environment")]
    UnresolvedSecret { id: String, var: String },

    #[error(transparent)]
    Dependency(#[from] GraphError),

    #[error("plugin `{id}`: lifecycle hook `{hook}` failed: {reason}")]
    HookFailed {
        id: String,
        hook: String,
        reason: String,
    },

    #[error("plugin `{id}` is in state `{state}`, expected {expected}")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    #[error("plugin `{id}`: shutdown did not finish within {seconds}s")]
    ShutdownTimeout { id: String, seconds: u64 },

    #[error("plugin `{id}`: lifecycle call failed: {reason}")]
    LifecycleFailed { id: String, reason: String },

    #[error("i/o error reading `{path}`: {reason}")]
    Io { path: String, reason: String },
}

impl PluginError {
    /// Stable machine-readable code, used by the admin API.
    pub fn kind_code(&self) -> &'static str {
        match self {
            PluginError::Manifest(_) => "manifest_schema",
            PluginError::UnknownPlugin(_) => "unknown_plugin",
            PluginError::DuplicateId(_) => "duplicate_id",
            PluginError::CoreVersionMismatch { .. } => "core_version_mismatch",
            PluginError::MissingEntrypoint { .. } => "missing_entrypoint",
            PluginError::ModuleNotFound { .. } => "module_not_found",
            PluginError::ClassNotFound { .. } => "class_not_found",
            PluginError::ConstructorFailed { .. } => "constructor_failed",
            PluginError::KindMismatch { .. } => "kind_mismatch",
            PluginError::ConfigInvalid { .. } => "config_invalid",
            PluginError::MissingConfigKey { .. } => "config_missing_key",
            PluginError::UnresolvedSecret { .. } => "config_unresolved_secret",
            PluginError::Dependency(GraphError::MissingDependency { .. }) => "missing_dependency",
            PluginError::Dependency(GraphError::VersionIncompatibility { .. }) => {
                "version_incompatibility"
            }
            PluginError::Dependency(GraphError::CyclicDependency { .. }) => "cyclic_dependency",
            PluginError::HookFailed { .. } => "hook_failed",
            PluginError::InvalidState { .. } => "invalid_state",
            PluginError::ShutdownTimeout { .. } => "shutdown_timeout",
            PluginError::LifecycleFailed { .. } => "lifecycle_failed",
            PluginError::Io { .. } => "io",
        }
    }
}

/// How a plugin failed at runtime, during processing or scoring.
///
/// The tag drives retry routing: transient failures are retried up to the
/// pipeline's retry budget, permanent ones go straight to the dead-letter
/// path.
#[derive(Debug, Clone, Error)]
pub enum PluginRuntimeError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl PluginRuntimeError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}
