//! Trace and request identity, threaded explicitly through the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation identity for one unit of work.
///
/// `trace_id` survives across services and across every event spawned while
/// handling one inbound request or scrape; `request_id` identifies a single
/// hop. Both are 32-character lowercase hex strings, which is exactly the
/// simple form of a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub request_id: String,
}

impl TraceContext {
    /// Fresh trace and request ids, for work that originates inside the
    /// system (a scheduled scrape, a test fixture).
    pub fn generate() -> Self {
        Self {
            trace_id: new_id(),
            request_id: new_id(),
        }
    }

    /// Continue an incoming trace: keep the caller's trace id, mint a fresh
    /// request id for this hop.
    pub fn with_trace(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            request_id: new_id(),
        }
    }

    /// Whether `id` is a well-formed trace/request id.
    pub fn is_valid_id(id: &str) -> bool {
        id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_32_hex() {
        let ctx = TraceContext::generate();
        assert!(TraceContext::is_valid_id(&ctx.trace_id));
        assert!(TraceContext::is_valid_id(&ctx.request_id));
        assert_ne!(ctx.trace_id, ctx.request_id);
    }

    #[test]
    fn with_trace_keeps_the_trace_id() {
        let ctx = TraceContext::with_trace("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(ctx.trace_id, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(TraceContext::is_valid_id(&ctx.request_id));
    }

    #[test]
    fn id_validation() {
        assert!(!TraceContext::is_valid_id("short"));
        assert!(!TraceContext::is_valid_id("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));
        assert!(!TraceContext::is_valid_id("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
        assert!(TraceContext::is_valid_id("0123456789abcdef0123456789abcdef"));
    }
}
