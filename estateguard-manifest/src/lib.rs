//! # Plugin Manifest and Version Library
//!
//! Parsing and validation for everything a plugin declares about itself
//! before any of its code runs: the `plugin.yaml` manifest, semantic
//! versions, and the version constraints plugins place on the core and on
//! each other.
//!
//! The library is deliberately pure: no I/O, no registry access. The plugin
//! manager reads manifest documents off disk and hands the bytes here; the
//! dependency graph asks [`Constraint::matches`] whether a loaded version
//! satisfies a declared requirement.
//!
//! ## Constraint syntax
//!
//! - exact: `1.2.3` (equivalent to `=1.2.3`)
//! - range operators: `>=1.0.0`, `>1.0.0`, `<=2.0.0`, `<2.0.0`, `=1.2.3`
//! - combined (AND): `>=1.0.0 <2.0.0`
//! - caret: `^1.2.3` is `>=1.2.3 <2.0.0`; leading zeros narrow the window
//!   (`^0.2.3` is `>=0.2.3 <0.3.0`, `^0.0.3` is `>=0.0.3 <0.0.4`)
//! - tilde: `~1.2.3` is `>=1.2.3 <1.3.0`
//! - wildcards: `*`, `1.*`, `1.2.*`
//!
//! Prerelease versions are matched strictly: they satisfy a constraint only
//! when some comparator carries a prerelease operand on the same
//! major.minor.patch triple (which covers exact `=1.2.3-rc.1` comparators as
//! well). Build metadata never participates in ordering.

mod constraint;
mod error;
mod manifest;
mod version;

pub use constraint::{Comparator, Constraint, Op};
pub use error::{ParseError, SchemaError};
pub use manifest::{
    parse_manifest, EntryPoint, HealthProbe, LifecycleHooks, ManifestConfig, ManifestDependencies,
    PluginKind, PluginManifest, ResourceHints, MAX_MANIFEST_BYTES, PLUGIN_API_VERSION,
};
pub use version::{Identifier, Version};

/// Convenience form of [`Constraint::matches`] for call sites that read
/// better with a free function.
pub fn satisfies(version: &Version, constraint: &Constraint) -> bool {
    constraint.matches(version)
}
