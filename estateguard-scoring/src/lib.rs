//! # Risk-Scoring Orchestrator
//!
//! Fans one listing out to every enabled detection plugin, aggregates the
//! per-plugin scores into a 0-100 fraud score, and classifies the result
//! into a risk band with an explainable breakdown.
//!
//! Scoring is a pure function of the enabled detector set and the listing:
//! detectors run concurrently under a deadline, but the aggregation is a
//! deterministic fold keyed by plugin id, so completion order and plugin
//! registration order never change the result. A detector that errors or
//! misses the deadline is logged and dropped from the aggregate; the
//! remaining detectors still contribute with renormalized weights.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use estateguard_events::{NormalizedListing, RiskLevel, RiskSignal};
use estateguard_plugins::{DetectionOutcome, PluginRegistry, ProcessingContext};

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Wall-time cap over the whole detector fan-out.
    pub deadline: Duration,
    /// Signals below this confidence are excluded from the output. They do
    /// not affect the plugin's score contribution.
    pub confidence_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            confidence_threshold: 0.5,
        }
    }
}

/// One detector's contribution, as reported in the breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct PluginScore {
    pub plugin_id: String,
    pub score: f64,
    pub weight: f64,
    pub normalized_weight: f64,
    pub confidence: f64,
    pub signal_count: usize,
}

/// The scoring result for one listing.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    pub signals: Vec<RiskSignal>,
    pub confidence: f64,
    pub breakdown: Vec<PluginScore>,
}

impl RiskAssessment {
    /// The assessment for a listing no detector looked at.
    fn empty() -> Self {
        Self {
            fraud_score: 0.0,
            risk_level: RiskLevel::Safe,
            signals: Vec::new(),
            confidence: 0.0,
            breakdown: Vec::new(),
        }
    }
}

pub struct RiskScorer {
    registry: Arc<PluginRegistry>,
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(registry: Arc<PluginRegistry>, config: ScoringConfig) -> Self {
        Self { registry, config }
    }

    /// Score one listing against every enabled detection plugin.
    pub async fn score(&self, listing: &NormalizedListing, ctx: &ProcessingContext) -> RiskAssessment {
        let detectors = self.registry.enabled_detection();
        if detectors.is_empty() {
            return RiskAssessment::empty();
        }

        let listing = Arc::new(listing.clone());
        let mut tasks = JoinSet::new();
        let mut weights: BTreeMap<String, f64> = BTreeMap::new();
        let mut entries: BTreeMap<String, Arc<estateguard_plugins::LoadedPlugin>> = BTreeMap::new();

        for entry in detectors {
            let id = entry.id().to_string();
            weights.insert(id.clone(), entry.weight());
            entries.insert(id.clone(), Arc::clone(&entry));
            let Some(detector) = entry.instance.as_detection().cloned() else {
                continue;
            };
            let listing = Arc::clone(&listing);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = detector.analyze(&listing, &ctx).await;
                (id, outcome, started.elapsed())
            });
        }

        // Fan-in under the scoring deadline. Results land in a map keyed by
        // plugin id so the fold below is order-independent.
        let mut outcomes: BTreeMap<String, DetectionOutcome> = BTreeMap::new();
        let deadline = tokio::time::Instant::now() + self.config.deadline;
        loop {
            let joined = match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    let stragglers = tasks.len();
                    tasks.abort_all();
                    warn!(stragglers, "scoring deadline exceeded, dropping unfinished detectors");
                    break;
                }
            };
            match joined {
                Ok((id, Ok(outcome), elapsed)) => {
                    if let Some(entry) = entries.get(&id) {
                        entry.record_execution(elapsed, true);
                    }
                    outcomes.insert(id, outcome);
                }
                Ok((id, Err(err), elapsed)) => {
                    if let Some(entry) = entries.get(&id) {
                        entry.record_execution(elapsed, false);
                    }
                    warn!(plugin = %id, error = %err, "detection plugin failed, dropping its contribution");
                }
                Err(join_err) => {
                    warn!(error = %join_err, "detection task panicked, dropping its contribution");
                }
            }
        }

        if outcomes.is_empty() {
            debug!("no detector survived scoring");
            return RiskAssessment::empty();
        }

        self.aggregate(outcomes, &weights)
    }

    /// Deterministic fold over the surviving outcomes.
    fn aggregate(
        &self,
        outcomes: BTreeMap<String, DetectionOutcome>,
        weights: &BTreeMap<String, f64>,
    ) -> RiskAssessment {
        let total_weight: f64 = outcomes
            .keys()
            .map(|id| weights.get(id).copied().unwrap_or(0.0))
            .sum();
        let equal_weight = 1.0 / outcomes.len() as f64;

        let mut fraud_score = 0.0;
        let mut confidence = 0.0;
        let mut signals = Vec::new();
        let mut breakdown = Vec::with_capacity(outcomes.len());

        for (id, outcome) in &outcomes {
            let weight = weights.get(id).copied().unwrap_or(0.0);
            // Zero total weight falls back to equal weighting.
            let normalized_weight = if total_weight > 0.0 {
                weight / total_weight
            } else {
                equal_weight
            };

            let score = outcome.overall_score.clamp(0.0, 1.0);
            let plugin_confidence = plugin_confidence(outcome);

            fraud_score += score * normalized_weight;
            confidence += plugin_confidence * normalized_weight;

            breakdown.push(PluginScore {
                plugin_id: id.clone(),
                score,
                weight,
                normalized_weight,
                confidence: plugin_confidence,
                signal_count: outcome.signals.len(),
            });

            signals.extend(
                outcome
                    .signals
                    .iter()
                    .filter(|signal| signal.confidence >= self.config.confidence_threshold)
                    .cloned(),
            );
        }

        let fraud_score = (fraud_score * 100.0).clamp(0.0, 100.0);
        RiskAssessment {
            fraud_score,
            risk_level: RiskLevel::from_score(fraud_score),
            signals,
            confidence: confidence.clamp(0.0, 1.0),
            breakdown,
        }
    }
}

/// A plugin's confidence: its own report, else the mean of its signal
/// confidences, else zero.
fn plugin_confidence(outcome: &DetectionOutcome) -> f64 {
    if let Some(confidence) = outcome.confidence {
        return confidence.clamp(0.0, 1.0);
    }
    if outcome.signals.is_empty() {
        return 0.0;
    }
    let sum: f64 = outcome.signals.iter().map(|s| s.confidence).sum();
    (sum / outcome.signals.len() as f64).clamp(0.0, 1.0)
}
