//! Fixture source: emits raw listings straight from configuration.
//!
//! Used by demos and integration setups that need deterministic input
//! without scraping a live portal. The configured payloads are emitted as
//! one batch, then the source is exhausted.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use estateguard_events::RawListingBody;

use crate::error::PluginRuntimeError;
use crate::traits::{Plugin, ProcessingContext, SourcePlugin};

pub struct FixtureSource {
    plugin_id: String,
    pending: Mutex<Vec<Value>>,
}

impl FixtureSource {
    pub fn new(plugin_id: String) -> Self {
        Self {
            plugin_id,
            pending: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Plugin for FixtureSource {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        let listings = config
            .get("listings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        *self.pending.lock() = listings;
        Ok(())
    }
}

#[async_trait]
impl SourcePlugin for FixtureSource {
    async fn fetch_batch(
        &self,
        ctx: &ProcessingContext,
    ) -> Result<Vec<RawListingBody>, PluginRuntimeError> {
        if ctx.is_cancelled() {
            return Ok(Vec::new());
        }
        let drained: Vec<Value> = std::mem::take(&mut *self.pending.lock());
        let batch = drained
            .into_iter()
            .enumerate()
            .map(|(index, payload)| {
                let source_url = payload
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("fixture://{}/{index}", self.plugin_id));
                RawListingBody {
                    payload,
                    source_url,
                    scraped_at: Utc::now(),
                    source_plugin_id: self.plugin_id.clone(),
                }
            })
            .collect();
        Ok(batch)
    }
}
