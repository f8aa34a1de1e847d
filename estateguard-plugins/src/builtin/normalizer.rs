//! The normalizer stage: raw portal payloads into the unified listing
//! model.
//!
//! Portals disagree about almost everything, so the normalizer reads a
//! small set of common field spellings and maps them onto the canonical
//! shape. A payload that cannot produce a valid listing is a permanent
//! failure: retrying will not make the scrape grow a price.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use estateguard_events::{
    GeoPoint, ListingSource, ListingType, Location, MediaItem, MediaKind, NormalizedListing,
    Price, PricePeriod, PropertyDetails, PropertyType, Seller, SellerType,
};

use crate::error::PluginRuntimeError;
use crate::traits::{PipelineItem, Plugin, ProcessingContext, ProcessingPlugin};

#[derive(Debug, Clone)]
struct NormalizerConfig {
    default_currency: String,
    default_country: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            default_currency: "EUR".to_string(),
            default_country: "PT".to_string(),
        }
    }
}

#[derive(Default)]
pub struct ListingNormalizer {
    config: RwLock<NormalizerConfig>,
}

#[async_trait]
impl Plugin for ListingNormalizer {
    async fn configure(&self, config: &Value) -> anyhow::Result<()> {
        let mut guard = self.config.write();
        if let Some(currency) = config.get("default_currency").and_then(Value::as_str) {
            guard.default_currency = currency.to_uppercase();
        }
        if let Some(country) = config.get("default_country").and_then(Value::as_str) {
            guard.default_country = country.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingPlugin for ListingNormalizer {
    fn stage_name(&self) -> &str {
        "normalize"
    }

    fn default_priority(&self) -> i32 {
        10
    }

    async fn process(
        &self,
        item: PipelineItem,
        _ctx: &ProcessingContext,
    ) -> Result<PipelineItem, PluginRuntimeError> {
        let config = self.config.read().clone();
        let listing = normalize(&item.raw.payload, &item.raw, &config)?;
        listing
            .validate()
            .map_err(|err| PluginRuntimeError::permanent(format!("normalized listing invalid: {err}")))?;
        Ok(item.with_listing(listing))
    }
}

fn normalize(
    payload: &Value,
    raw: &estateguard_events::RawListingBody,
    config: &NormalizerConfig,
) -> Result<NormalizedListing, PluginRuntimeError> {
    let object = payload
        .as_object()
        .ok_or_else(|| PluginRuntimeError::permanent("payload is not a JSON object"))?;

    let platform = str_field(object, &["platform", "portal", "site"])
        .ok_or_else(|| PluginRuntimeError::permanent("payload carries no platform"))?;

    let (amount, currency, period) = price_of(object, config)?;

    let city = str_field(object, &["city", "municipality", "town"])
        .ok_or_else(|| PluginRuntimeError::permanent("payload carries no city"))?;

    let coordinates = coordinates_of(object);

    let external_id = str_field(object, &["external_id", "listing_id", "id", "reference"]);

    // The listing id must be stable across redeliveries of the same scrape,
    // so it is derived from the source identity rather than random.
    let identity = format!(
        "{}#{}",
        raw.source_url,
        external_id.as_deref().unwrap_or("")
    );
    let listing_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, identity.as_bytes());

    let description = str_field(object, &["description", "body", "text"]);

    Ok(NormalizedListing {
        listing_id,
        source: ListingSource {
            platform,
            url: Some(raw.source_url.clone()),
            external_id,
            scraped_at: raw.scraped_at,
        },
        listing_type: listing_type_of(object),
        property_type: property_type_of(object),
        location: Location {
            country: str_field(object, &["country"]).or_else(|| Some(config.default_country.clone())),
            region: str_field(object, &["region", "district"]),
            city,
            postal_code: str_field(object, &["postal_code", "zip"]),
            address: str_field(object, &["address", "street"]),
            coordinates,
        },
        price: Price {
            amount,
            currency,
            period,
        },
        details: PropertyDetails {
            area_sqm: num_field(object, &["area_sqm", "area", "size_sqm"]),
            rooms: int_field(object, &["rooms", "room_count"]),
            bedrooms: int_field(object, &["bedrooms"]),
            bathrooms: int_field(object, &["bathrooms"]),
            floor: num_field(object, &["floor"]).map(|f| f as i32),
            year_built: int_field(object, &["year_built", "construction_year"]),
            description,
            features: object
                .get("features")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        },
        media: media_of(object),
        seller: seller_of(object),
        metadata: BTreeMap::new(),
    })
}

fn str_field(object: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| object.get(*name))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn num_field(object: &serde_json::Map<String, Value>, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| object.get(*name)).and_then(Value::as_f64)
}

fn int_field(object: &serde_json::Map<String, Value>, names: &[&str]) -> Option<u32> {
    names
        .iter()
        .find_map(|name| object.get(*name))
        .and_then(Value::as_u64)
        .map(|n| n as u32)
}

fn price_of(
    object: &serde_json::Map<String, Value>,
    config: &NormalizerConfig,
) -> Result<(f64, String, Option<PricePeriod>), PluginRuntimeError> {
    // Either a `price` object or flat `price`/`currency` fields.
    if let Some(price) = object.get("price") {
        if let Some(nested) = price.as_object() {
            let amount = nested
                .get("amount")
                .and_then(Value::as_f64)
                .ok_or_else(|| PluginRuntimeError::permanent("price.amount is missing"))?;
            let currency = nested
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or(&config.default_currency)
                .to_uppercase();
            let period = nested
                .get("period")
                .and_then(Value::as_str)
                .and_then(period_of);
            return Ok((amount, currency, period));
        }
        if let Some(amount) = price.as_f64() {
            let currency = object
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or(&config.default_currency)
                .to_uppercase();
            return Ok((amount, currency, None));
        }
    }
    Err(PluginRuntimeError::permanent("payload carries no price"))
}

fn period_of(raw: &str) -> Option<PricePeriod> {
    match raw.to_lowercase().as_str() {
        "day" | "daily" => Some(PricePeriod::Day),
        "week" | "weekly" => Some(PricePeriod::Week),
        "month" | "monthly" => Some(PricePeriod::Month),
        _ => None,
    }
}

fn listing_type_of(object: &serde_json::Map<String, Value>) -> ListingType {
    match str_field(object, &["listing_type", "offer_type", "type"])
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "sale" | "sell" | "buy" => ListingType::Sale,
        "rent" | "rental" | "lease" => ListingType::Rent,
        _ => ListingType::Unknown,
    }
}

fn property_type_of(object: &serde_json::Map<String, Value>) -> PropertyType {
    match str_field(object, &["property_type", "category"])
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "apartment" | "flat" => PropertyType::Apartment,
        "house" | "villa" | "townhouse" => PropertyType::House,
        "room" => PropertyType::Room,
        "land" | "plot" => PropertyType::Land,
        "commercial" | "office" | "retail" => PropertyType::Commercial,
        _ => PropertyType::Other,
    }
}

fn coordinates_of(object: &serde_json::Map<String, Value>) -> Option<GeoPoint> {
    let coords = object.get("coordinates").and_then(Value::as_object)?;
    let lat = coords.get("lat").and_then(Value::as_f64)?;
    let lon = coords
        .get("lon")
        .or_else(|| coords.get("lng"))
        .and_then(Value::as_f64)?;
    Some(GeoPoint { lat, lon })
}

fn media_of(object: &serde_json::Map<String, Value>) -> Vec<MediaItem> {
    object
        .get("photos")
        .or_else(|| object.get("images"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|url| MediaItem {
                    url: url.to_string(),
                    kind: MediaKind::Photo,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn seller_of(object: &serde_json::Map<String, Value>) -> Seller {
    let seller = object.get("seller").and_then(Value::as_object);
    let seller_type = seller
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .map(|t| match t.to_lowercase().as_str() {
            "agency" | "agent" => SellerType::Agency,
            "private" | "owner" => SellerType::Private,
            "developer" => SellerType::Developer,
            _ => SellerType::Unknown,
        })
        .unwrap_or(SellerType::Unknown);
    Seller {
        name: seller.and_then(|s| s.get("name")).and_then(Value::as_str).map(str::to_string),
        phone: seller.and_then(|s| s.get("phone")).and_then(Value::as_str).map(str::to_string),
        email: seller.and_then(|s| s.get("email")).and_then(Value::as_str).map(str::to_string),
        seller_type,
    }
}
