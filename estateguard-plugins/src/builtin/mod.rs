//! Built-in plugins compiled into the runtime.
//!
//! These cover the baseline pipeline for the supported portals: a
//! normalizer that maps raw scrapes into the unified listing model, two
//! enrichment stages, and three fraud detectors. Deployments select and
//! order them through manifests like any external plugin.

mod duplicate;
mod enrich;
mod fixtures;
mod geocode;
mod keyword;
mod normalizer;
mod price_anomaly;

use std::sync::Arc;

use crate::factory::EntrypointRegistry;
use crate::state::PluginInstance;

pub use duplicate::DuplicateContentDetection;
pub use enrich::ListingEnricher;
pub use fixtures::FixtureSource;
pub use geocode::GeocodeEnricher;
pub use keyword::UrgencyKeywordDetection;
pub use normalizer::ListingNormalizer;
pub use price_anomaly::PriceAnomalyDetection;

/// Module name manifests use to select a built-in class.
pub const BUILTIN_MODULE: &str = "estateguard.builtin";

pub fn register_builtins(registry: &mut EntrypointRegistry) {
    registry.register(BUILTIN_MODULE, "ListingNormalizer", |_manifest| {
        Ok(PluginInstance::Processing(Arc::new(ListingNormalizer::default())))
    });
    registry.register(BUILTIN_MODULE, "GeocodeEnricher", |_manifest| {
        Ok(PluginInstance::Processing(Arc::new(GeocodeEnricher::default())))
    });
    registry.register(BUILTIN_MODULE, "ListingEnricher", |_manifest| {
        Ok(PluginInstance::Processing(Arc::new(ListingEnricher::default())))
    });
    registry.register(BUILTIN_MODULE, "PriceAnomalyDetection", |manifest| {
        Ok(PluginInstance::Detection(Arc::new(PriceAnomalyDetection::new(
            manifest.id.clone(),
        ))))
    });
    registry.register(BUILTIN_MODULE, "DuplicateContentDetection", |manifest| {
        Ok(PluginInstance::Detection(Arc::new(
            DuplicateContentDetection::new(manifest.id.clone()),
        )))
    });
    registry.register(BUILTIN_MODULE, "UrgencyKeywordDetection", |manifest| {
        Ok(PluginInstance::Detection(Arc::new(
            UrgencyKeywordDetection::new(manifest.id.clone()),
        )))
    });
    registry.register(BUILTIN_MODULE, "FixtureSource", |manifest| {
        Ok(PluginInstance::Source(Arc::new(FixtureSource::new(
            manifest.id.clone(),
        ))))
    });
}
