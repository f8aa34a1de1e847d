//! Failure classification and retry decisions.
//!
//! Transient failures (broker hiccups, timeouts, rate limiting) are worth
//! re-running; permanent ones (schema violations, unparseable payloads)
//! are not, and go straight to the dead-letter path.

use thiserror::Error;

use estateguard_plugins::PluginRuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        }
    }
}

/// A pipeline run that did not produce a processed listing.
#[derive(Debug, Clone, Error)]
#[error("{} failure{}: {message}", kind.as_str(), stage.as_deref().map(|s| format!(" at stage `{s}`")).unwrap_or_default())]
pub struct PipelineFailure {
    pub kind: FailureKind,
    /// The stage that failed, when the failure is attributable to one.
    pub stage: Option<String>,
    pub message: String,
}

impl PipelineFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            stage: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            stage: None,
            message: message.into(),
        }
    }

    pub fn from_plugin(stage: &str, err: PluginRuntimeError) -> Self {
        Self {
            kind: if err.is_permanent() {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            },
            stage: Some(stage.to_string()),
            message: err.to_string(),
        }
    }

    pub fn at_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    DeadLetter,
}

/// Retry policy: transient failures retry until the envelope's budget is
/// spent, permanent ones never do.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fallback budget for envelopes published without one.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn decide(
        &self,
        retry_count: u32,
        envelope_max_retries: u32,
        kind: FailureKind,
    ) -> RetryDecision {
        if kind == FailureKind::Permanent {
            return RetryDecision::DeadLetter;
        }
        let budget = if envelope_max_retries > 0 {
            envelope_max_retries
        } else {
            self.max_retries
        };
        if retry_count < budget {
            RetryDecision::Retry
        } else {
            RetryDecision::DeadLetter
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_failures_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, 3, FailureKind::Permanent),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn transient_failures_retry_until_the_budget_is_spent() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(0, 3, FailureKind::Transient), RetryDecision::Retry);
        assert_eq!(policy.decide(2, 3, FailureKind::Transient), RetryDecision::Retry);
        assert_eq!(
            policy.decide(3, 3, FailureKind::Transient),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn policy_budget_backs_envelopes_without_one() {
        let policy = RetryPolicy { max_retries: 2 };
        assert_eq!(policy.decide(1, 0, FailureKind::Transient), RetryDecision::Retry);
        assert_eq!(
            policy.decide(2, 0, FailureKind::Transient),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn plugin_errors_map_onto_failure_kinds() {
        let transient = PipelineFailure::from_plugin(
            "geocode",
            PluginRuntimeError::transient("rate limited"),
        );
        assert_eq!(transient.kind, FailureKind::Transient);
        assert_eq!(transient.stage.as_deref(), Some("geocode"));

        let permanent = PipelineFailure::from_plugin(
            "normalize",
            PluginRuntimeError::permanent("no price"),
        );
        assert_eq!(permanent.kind, FailureKind::Permanent);
    }
}
