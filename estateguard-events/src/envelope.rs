//! The metadata wrapper around every queued event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trace::TraceContext;

/// Wire-format version stamped into every envelope.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Discriminates the typed body carried next to the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RawListing,
    ListingNormalized,
    ListingProcessed,
    FraudDetected,
    ProcessingFailed,
}

/// Delivery state of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

/// One envelope per message delivery: identity, lineage, trace context and
/// retry accounting.
///
/// Child events copy the parent's trace and request ids and record the
/// parent's `event_id` as `parent_event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_platform: Option<String>,
    pub trace_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<Uuid>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub version: String,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, trace: &TraceContext, max_retries: u32) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source_plugin_id: None,
            source_platform: None,
            trace_id: trace.trace_id.clone(),
            request_id: trace.request_id.clone(),
            parent_event_id: None,
            retry_count: 0,
            max_retries,
            status: EventStatus::Pending,
            tags: Vec::new(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }

    /// Derive a child envelope: fresh event id, same trace and request ids,
    /// lineage recorded through `parent_event_id`.
    pub fn child(&self, event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source_plugin_id: self.source_plugin_id.clone(),
            source_platform: self.source_platform.clone(),
            trace_id: self.trace_id.clone(),
            request_id: self.request_id.clone(),
            parent_event_id: Some(self.event_id),
            retry_count: 0,
            max_retries: self.max_retries,
            status: EventStatus::Pending,
            tags: self.tags.clone(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }

    pub fn with_source(mut self, plugin_id: impl Into<String>, platform: impl Into<String>) -> Self {
        self.source_plugin_id = Some(plugin_id.into());
        self.source_platform = Some(platform.into());
        self
    }

    pub fn trace(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id.clone(),
            request_id: self.request_id.clone(),
        }
    }

    /// Whether another retry is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Copy of this envelope for the next delivery attempt.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next.status = EventStatus::Pending;
        next
    }
}
