//! Price anomaly detector.
//!
//! Listings priced far below the local market are the classic bait for
//! advance-fee scams. The detector compares the asking price against a
//! per-city median table (configurable per deployment) and scores the
//! shortfall.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};

use estateguard_events::{ListingType, NormalizedListing, RiskSignal};

use crate::error::PluginRuntimeError;
use crate::traits::{DetectionOutcome, DetectionPlugin, Plugin, ProcessingContext};

#[derive(Debug, Clone)]
struct PriceAnomalyConfig {
    /// Median sale prices per lowercase city name.
    sale_medians: HashMap<String, f64>,
    /// Median monthly rents per lowercase city name.
    rent_medians: HashMap<String, f64>,
    fallback_sale_median: f64,
    fallback_rent_median: f64,
    /// Shortfall fraction below which no signal is emitted.
    deviation_threshold: f64,
}

impl Default for PriceAnomalyConfig {
    fn default() -> Self {
        Self {
            sale_medians: HashMap::from([
                ("lisboa".to_string(), 450_000.0),
                ("porto".to_string(), 320_000.0),
                ("braga".to_string(), 230_000.0),
                ("faro".to_string(), 280_000.0),
            ]),
            rent_medians: HashMap::from([
                ("lisboa".to_string(), 1_400.0),
                ("porto".to_string(), 1_000.0),
            ]),
            fallback_sale_median: 250_000.0,
            fallback_rent_median: 900.0,
            deviation_threshold: 0.4,
        }
    }
}

pub struct PriceAnomalyDetection {
    plugin_id: String,
    config: RwLock<PriceAnomalyConfig>,
}

impl PriceAnomalyDetection {
    pub fn new(plugin_id: String) -> Self {
        Self {
            plugin_id,
            config: RwLock::new(PriceAnomalyConfig::default()),
        }
    }
}

#[async_trait]
impl Plugin for PriceAnomalyDetection {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        let mut guard = self.config.write();
        if let Some(threshold) = config.get("deviation_threshold").and_then(Value::as_f64) {
            anyhow::ensure!(
                (0.0..1.0).contains(&threshold),
                "deviation_threshold must be in [0, 1)"
            );
            guard.deviation_threshold = threshold;
        }
        if let Some(map) = config.get("sale_medians").and_then(Value::as_object) {
            for (city, median) in map {
                if let Some(median) = median.as_f64() {
                    guard.sale_medians.insert(city.to_lowercase(), median);
                }
            }
        }
        if let Some(map) = config.get("rent_medians").and_then(Value::as_object) {
            for (city, median) in map {
                if let Some(median) = median.as_f64() {
                    guard.rent_medians.insert(city.to_lowercase(), median);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DetectionPlugin for PriceAnomalyDetection {
    fn default_weight(&self) -> f64 {
        0.7
    }

    async fn analyze(
        &self,
        listing: &NormalizedListing,
        _ctx: &ProcessingContext,
    ) -> Result<DetectionOutcome, PluginRuntimeError> {
        let config = self.config.read().clone();
        let city = listing.location.city.to_lowercase();
        let median = match listing.listing_type {
            ListingType::Rent => config
                .rent_medians
                .get(&city)
                .copied()
                .unwrap_or(config.fallback_rent_median),
            _ => config
                .sale_medians
                .get(&city)
                .copied()
                .unwrap_or(config.fallback_sale_median),
        };

        if median <= 0.0 || listing.price.amount <= 0.0 {
            return Ok(DetectionOutcome::clean());
        }

        let shortfall = (median - listing.price.amount) / median;
        if shortfall < config.deviation_threshold {
            return Ok(DetectionOutcome::clean());
        }

        // Map the shortfall beyond the threshold onto (0, 1].
        let span = 1.0 - config.deviation_threshold;
        let score = ((shortfall - config.deviation_threshold) / span).clamp(0.0, 1.0);
        let signal = RiskSignal {
            signal_type: "price_below_market".to_string(),
            score,
            confidence: 0.8,
            plugin_id: self.plugin_id.clone(),
            reason: format!(
                "asking price {:.0} {} is {:.0}% below the {} median {:.0}",
                listing.price.amount,
                listing.price.currency,
                shortfall * 100.0,
                listing.location.city,
                median
            ),
            evidence: [
                ("median".to_string(), json!(median)),
                ("asking".to_string(), json!(listing.price.amount)),
                ("shortfall".to_string(), json!(shortfall)),
            ]
            .into_iter()
            .collect(),
        };
        Ok(DetectionOutcome {
            overall_score: score,
            confidence: Some(0.8),
            signals: vec![signal],
        })
    }
}
