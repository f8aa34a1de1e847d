//! Duplicate-content detector.
//!
//! Scam rings repost the same description across cities and portals. The
//! detector keeps a bounded window of recently seen description hashes and
//! flags reposts.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use estateguard_events::{NormalizedListing, RiskSignal};

use crate::error::PluginRuntimeError;
use crate::traits::{DetectionOutcome, DetectionPlugin, Plugin, ProcessingContext};

const DEFAULT_WINDOW: usize = 10_000;
/// Descriptions shorter than this carry too little signal to compare.
const MIN_DESCRIPTION_LEN: usize = 40;

struct SeenWindow {
    hashes: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl SeenWindow {
    fn new(capacity: usize) -> Self {
        Self {
            hashes: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns true when the hash was already present.
    fn check_and_insert(&mut self, hash: u64) -> bool {
        if self.hashes.contains(&hash) {
            return true;
        }
        self.hashes.insert(hash);
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.hashes.remove(&evicted);
            }
        }
        false
    }
}

pub struct DuplicateContentDetection {
    plugin_id: String,
    seen: Mutex<SeenWindow>,
}

impl DuplicateContentDetection {
    pub fn new(plugin_id: String) -> Self {
        Self {
            plugin_id,
            seen: Mutex::new(SeenWindow::new(DEFAULT_WINDOW)),
        }
    }
}

fn description_hash(listing: &NormalizedListing) -> Option<u64> {
    let description = listing.details.description.as_deref()?.trim();
    if description.len() < MIN_DESCRIPTION_LEN {
        return None;
    }
    let normalized: String = description
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    Some(hasher.finish())
}

#[async_trait]
impl Plugin for DuplicateContentDetection {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        if let Some(window) = config.get("window").and_then(Value::as_u64) {
            anyhow::ensure!(window > 0, "window must be positive");
            *self.seen.lock() = SeenWindow::new(window as usize);
        }
        Ok(())
    }
}

#[async_trait]
impl DetectionPlugin for DuplicateContentDetection {
    fn default_weight(&self) -> f64 {
        0.6
    }

    async fn analyze(
        &self,
        listing: &NormalizedListing,
        _ctx: &ProcessingContext,
    ) -> Result<DetectionOutcome, PluginRuntimeError> {
        let Some(hash) = description_hash(listing) else {
            return Ok(DetectionOutcome::clean());
        };

        let duplicate = self.seen.lock().check_and_insert(hash);
        if !duplicate {
            return Ok(DetectionOutcome::clean());
        }

        let signal = RiskSignal {
            signal_type: "duplicate_description".to_string(),
            score: 0.8,
            confidence: 0.9,
            plugin_id: self.plugin_id.clone(),
            reason: "listing description was already seen on a recent listing".to_string(),
            evidence: [("description_hash".to_string(), json!(format!("{hash:x}")))]
                .into_iter()
                .collect(),
        };
        Ok(DetectionOutcome {
            overall_score: 0.8,
            confidence: Some(0.9),
            signals: vec![signal],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use estateguard_events::{
        ListingSource, ListingType, Location, Price, PropertyDetails, PropertyType, Seller,
        SellerType, TraceContext,
    };
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn listing(description: &str) -> NormalizedListing {
        NormalizedListing {
            listing_id: Uuid::new_v4(),
            source: ListingSource {
                platform: "olx".into(),
                url: None,
                external_id: None,
                scraped_at: Utc::now(),
            },
            listing_type: ListingType::Rent,
            property_type: PropertyType::Apartment,
            location: Location {
                country: None,
                region: None,
                city: "Porto".into(),
                postal_code: None,
                address: None,
                coordinates: None,
            },
            price: Price {
                amount: 800.0,
                currency: "EUR".into(),
                period: None,
            },
            details: PropertyDetails {
                description: Some(description.into()),
                ..PropertyDetails::default()
            },
            media: Vec::new(),
            seller: Seller {
                name: None,
                phone: None,
                email: None,
                seller_type: SellerType::Private,
            },
            metadata: BTreeMap::new(),
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(TraceContext::generate())
    }

    const DESCRIPTION: &str =
        "Beautiful fully furnished apartment near the river, available immediately, all bills included.";

    #[tokio::test]
    async fn first_sighting_is_clean_repost_is_flagged() {
        let detector = DuplicateContentDetection::new("plugin-detection-duplicate-content".into());
        let first = detector.analyze(&listing(DESCRIPTION), &ctx()).await.unwrap();
        assert!(first.signals.is_empty());

        // Same text, different whitespace and case.
        let reposted = DESCRIPTION.to_uppercase().replace(' ', "  ");
        let second = detector.analyze(&listing(&reposted), &ctx()).await.unwrap();
        assert_eq!(second.overall_score, 0.8);
        assert_eq!(second.signals[0].signal_type, "duplicate_description");
    }

    #[tokio::test]
    async fn short_descriptions_are_ignored() {
        let detector = DuplicateContentDetection::new("plugin-detection-duplicate-content".into());
        detector.analyze(&listing("short text"), &ctx()).await.unwrap();
        let again = detector.analyze(&listing("short text"), &ctx()).await.unwrap();
        assert!(again.signals.is_empty());
    }
}
