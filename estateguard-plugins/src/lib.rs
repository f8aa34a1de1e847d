//! # EstateGuard Plugin System
//!
//! The plugin system is how every behavior that touches listing content
//! enters the runtime: scrapers that pull raw listings from portals,
//! processing stages that normalize and enrich them, and fraud detectors
//! that score them. The core stays generic; plugins carry the domain
//! knowledge.
//!
//! ## Architecture
//!
//! - **Manifest-driven discovery**: each plugin directory carries a
//!   `plugin.yaml` describing identity, version, kind, entrypoint,
//!   dependencies and configuration. Discovery walks a root directory;
//!   documents that fail the schema are logged and skipped.
//! - **Compiled-in entrypoints**: the manifest's `(module, class)` pair
//!   selects a factory from a registry populated at build time. There is no
//!   dynamic code loading; shipping a new plugin means shipping a binary
//!   that registers its constructor.
//! - **Typed contracts per kind**: source, processing and detection plugins
//!   each implement a dedicated trait on top of the shared [`Plugin`]
//!   lifecycle contract. Search and display plugins are registry-level
//!   citizens without a runtime role in the pipeline.
//! - **Single authority**: the [`PluginManager`] owns every loaded
//!   instance and is the only writer of the registry; the orchestrator and
//!   the scoring engine only read it.
//!
//! ## Lifecycle
//!
//! ```text
//!          load                 configure               enable
//! Unknown ------> Registered --------------> Configured -------> Enabled
//!                     |                          |                  |
//!                     |     configure-fail       |     disable      |
//!                     +-------> Failed <---------+  <---------------+
//! ```
//!
//! Hot reload replaces a plugin's live instance without dropping it from
//! the registry: the old instance keeps serving until the replacement is
//! fully constructed, configured and dependency-checked, then the registry
//! entry is swapped atomically. Any failure leaves the original in place.
//!
//! ## Failure containment
//!
//! A single plugin's discovery, load or reload failure never aborts the
//! batch; failures are accumulated and returned to the caller. Runtime
//! errors are tagged [`PluginRuntimeError::Transient`] or
//! [`PluginRuntimeError::Permanent`] so the orchestrator can route retries
//! without inspecting plugin internals.

mod binding;
pub mod builtin;
mod error;
mod factory;
mod hooks;
mod manager;
mod registry;
mod state;
mod stats;
pub mod testkit;
mod traits;

pub use binding::bind_config;
pub use error::{PluginError, PluginRuntimeError};
pub use factory::{EntrypointRegistry, PluginConstructor};
pub use manager::{
    LifecycleEvent, LifecycleEventKind, LoadReport, PluginManager, PluginManagerConfig,
};
pub use registry::PluginRegistry;
pub use state::{LoadedPlugin, PluginInstance, PluginRecord, PluginState};
pub use stats::{PluginStats, PluginStatsSnapshot};
pub use traits::{
    DetectionOutcome, DetectionPlugin, PipelineItem, Plugin, ProcessingContext, ProcessingPlugin,
    SourcePlugin,
};
