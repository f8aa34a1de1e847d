//! Typed event bodies and the wire-level event shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::EventEnvelope;
use crate::listing::NormalizedListing;

/// Risk classification bands over the 0-100 fraud score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Suspicious,
    Fraud,
}

impl RiskLevel {
    /// Band edges: `[0, 30)` safe, `[30, 70)` suspicious, `[70, 100]` fraud.
    pub fn from_score(score: f64) -> Self {
        if score < 30.0 {
            RiskLevel::Safe
        } else if score < 70.0 {
            RiskLevel::Suspicious
        } else {
            RiskLevel::Fraud
        }
    }
}

/// One piece of evidence a detection plugin produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub signal_type: String,
    /// Severity in `[0, 1]`.
    pub score: f64,
    /// How sure the detector is about this signal, in `[0, 1]`.
    pub confidence: f64,
    pub plugin_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, serde_json::Value>,
}

/// Body of a `raw_listing` event: whatever the scraper pulled, untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListingBody {
    pub payload: serde_json::Value,
    pub source_url: String,
    pub scraped_at: DateTime<Utc>,
    pub source_plugin_id: String,
}

/// Body of a `listing_processed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedListingBody {
    pub listing: NormalizedListing,
    /// Stage names in the order the pipeline ran them.
    pub stages: Vec<String>,
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    pub signals: Vec<RiskSignal>,
    pub processing_duration_ms: u64,
}

/// Body of a `fraud_detected` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudDetectedBody {
    pub listing_id: Uuid,
    pub platform: String,
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    pub signals: Vec<RiskSignal>,
}

/// Body of a `processing_failed` event. Carries enough to replay by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingFailedBody {
    pub error_kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// The original event, verbatim.
    pub original: serde_json::Value,
}

/// What actually travels on the queue: the envelope flattened next to a
/// typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub body: serde_json::Value,
}

impl Event {
    pub fn new<B: Serialize>(envelope: EventEnvelope, body: &B) -> Result<Self, serde_json::Error> {
        Ok(Self {
            envelope,
            body: serde_json::to_value(body)?,
        })
    }

    pub fn decode_body<B: DeserializeOwned>(&self) -> Result<B, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}
