//! Geocode enrichment stage.
//!
//! Fills missing coordinates from a small gazetteer of the cities the
//! supported portals cover, and polices coordinates that arrived with the
//! scrape.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use estateguard_events::GeoPoint;

use crate::error::PluginRuntimeError;
use crate::traits::{PipelineItem, Plugin, ProcessingContext, ProcessingPlugin};

const GAZETTEER: &[(&str, f64, f64)] = &[
    ("lisboa", 38.7223, -9.1393),
    ("lisbon", 38.7223, -9.1393),
    ("porto", 41.1579, -8.6291),
    ("braga", 41.5454, -8.4265),
    ("coimbra", 40.2033, -8.4103),
    ("faro", 37.0194, -7.9322),
    ("setubal", 38.5244, -8.8882),
    ("aveiro", 40.6405, -8.6538),
];

#[derive(Debug, Clone)]
struct GeocodeConfig {
    /// When true, out-of-bounds scraped coordinates fail the listing
    /// instead of being dropped.
    strict: bool,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self { strict: false }
    }
}

#[derive(Default)]
pub struct GeocodeEnricher {
    config: RwLock<GeocodeConfig>,
}

#[async_trait]
impl Plugin for GeocodeEnricher {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        if let Some(strict) = config.get("strict").and_then(Value::as_bool) {
            self.config.write().strict = strict;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingPlugin for GeocodeEnricher {
    fn stage_name(&self) -> &str {
        "geocode"
    }

    fn default_priority(&self) -> i32 {
        20
    }

    async fn process(
        &self,
        mut item: PipelineItem,
        _ctx: &ProcessingContext,
    ) -> Result<PipelineItem, PluginRuntimeError> {
        let strict = self.config.read().strict;
        let listing = item.listing.as_mut().ok_or_else(|| {
            PluginRuntimeError::permanent("geocode stage requires a normalized listing")
        })?;

        match &listing.location.coordinates {
            Some(point) if !point.in_bounds() => {
                if strict {
                    return Err(PluginRuntimeError::permanent(format!(
                        "coordinates ({}, {}) are outside valid bounds",
                        point.lat, point.lon
                    )));
                }
                listing.location.coordinates = None;
            }
            Some(_) => return Ok(item),
            None => {}
        }

        if listing.location.coordinates.is_none() {
            let city = listing.location.city.to_lowercase();
            if let Some((_, lat, lon)) = GAZETTEER.iter().find(|(name, _, _)| *name == city) {
                listing.location.coordinates = Some(GeoPoint { lat: *lat, lon: *lon });
            }
        }
        Ok(item)
    }
}
