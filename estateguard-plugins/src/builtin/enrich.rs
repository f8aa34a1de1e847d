//! Derived-field enrichment stage: price per square meter, tidied text.

use async_trait::async_trait;
use serde_json::json;

use crate::error::PluginRuntimeError;
use crate::traits::{PipelineItem, Plugin, ProcessingContext, ProcessingPlugin};

#[derive(Default)]
pub struct ListingEnricher;

#[async_trait]
impl Plugin for ListingEnricher {}

#[async_trait]
impl ProcessingPlugin for ListingEnricher {
    fn stage_name(&self) -> &str {
        "enrich"
    }

    fn default_priority(&self) -> i32 {
        30
    }

    async fn process(
        &self,
        mut item: PipelineItem,
        _ctx: &ProcessingContext,
    ) -> Result<PipelineItem, PluginRuntimeError> {
        let listing = item.listing.as_mut().ok_or_else(|| {
            PluginRuntimeError::permanent("enrich stage requires a normalized listing")
        })?;

        if let Some(area) = listing.details.area_sqm {
            if area > 0.0 {
                let per_sqm = listing.price.amount / area;
                listing
                    .metadata
                    .insert("price_per_sqm".to_string(), json!((per_sqm * 100.0).round() / 100.0));
            }
        }

        if let Some(description) = &listing.details.description {
            let trimmed = description.split_whitespace().collect::<Vec<_>>().join(" ");
            listing
                .metadata
                .insert("description_length".to_string(), json!(trimmed.len()));
            listing.details.description = Some(trimmed);
        }

        listing.price.currency = listing.price.currency.to_uppercase();
        Ok(item)
    }
}
