//! Urgency and payment-pressure keyword detector.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};

use estateguard_events::{NormalizedListing, RiskSignal};

use crate::error::PluginRuntimeError;
use crate::traits::{DetectionOutcome, DetectionPlugin, Plugin, ProcessingContext};

const DEFAULT_KEYWORDS: &[&str] = &[
    "western union",
    "moneygram",
    "wire transfer",
    "deposit first",
    "pay before viewing",
    "i am abroad",
    "currently overseas",
    "urgent",
    "no viewing possible",
    "send passport",
];

pub struct UrgencyKeywordDetection {
    plugin_id: String,
    keywords: RwLock<Vec<String>>,
}

impl UrgencyKeywordDetection {
    pub fn new(plugin_id: String) -> Self {
        Self {
            plugin_id,
            keywords: RwLock::new(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()),
        }
    }
}

#[async_trait]
impl Plugin for UrgencyKeywordDetection {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        if let Some(extra) = config.get("keywords").and_then(Value::as_array) {
            let mut keywords = self.keywords.write();
            for keyword in extra.iter().filter_map(Value::as_str) {
                let keyword = keyword.to_lowercase();
                if !keywords.contains(&keyword) {
                    keywords.push(keyword);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DetectionPlugin for UrgencyKeywordDetection {
    fn default_weight(&self) -> f64 {
        0.5
    }

    async fn analyze(
        &self,
        listing: &NormalizedListing,
        _ctx: &ProcessingContext,
    ) -> Result<DetectionOutcome, PluginRuntimeError> {
        let Some(description) = listing.details.description.as_deref() else {
            return Ok(DetectionOutcome::clean());
        };
        let haystack = description.to_lowercase();

        let keywords = self.keywords.read();
        let hits: Vec<&String> = keywords.iter().filter(|k| haystack.contains(k.as_str())).collect();
        if hits.is_empty() {
            return Ok(DetectionOutcome::clean());
        }

        let score = (hits.len() as f64 * 0.35).min(1.0);
        let signals = hits
            .iter()
            .map(|keyword| RiskSignal {
                signal_type: "scam_keyword".to_string(),
                score,
                confidence: 0.7,
                plugin_id: self.plugin_id.clone(),
                reason: format!("description contains \"{keyword}\""),
                evidence: [("keyword".to_string(), json!(keyword))].into_iter().collect(),
            })
            .collect();

        Ok(DetectionOutcome {
            overall_score: score,
            confidence: Some(0.7),
            signals,
        })
    }
}
