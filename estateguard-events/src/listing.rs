//! The canonical listing model every source portal is normalized into.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A normalized listing violated a model invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ListingError {
    #[error("source.platform must not be empty")]
    EmptyPlatform,
    #[error("price.amount {0} is negative")]
    NegativePrice(f64),
    #[error("coordinates ({lat}, {lon}) are outside valid bounds")]
    CoordinatesOutOfBounds { lat: f64, lon: f64 },
}

/// Where the listing came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSource {
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Sale,
    Rent,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    House,
    Room,
    Land,
    Commercial,
    Other,
}

/// WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn in_bounds(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePeriod {
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
    /// Present for rentals, absent for sales.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<PricePeriod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyDetails {
    pub area_sqm: Option<f64>,
    pub rooms: Option<u32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub floor: Option<i32>,
    pub year_built: Option<u32>,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    FloorPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerType {
    Agency,
    Private,
    Developer,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seller {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub seller_type: SellerType,
}

/// The unified data model. Created by the normalizer stage; later processing
/// stages return enriched copies rather than mutating shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    pub listing_id: Uuid,
    pub source: ListingSource,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub property_type: PropertyType,
    pub location: Location,
    pub price: Price,
    #[serde(default)]
    pub details: PropertyDetails,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaItem>,
    pub seller: Seller,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NormalizedListing {
    /// Check the model invariants: non-empty platform, non-negative price,
    /// in-bounds coordinates when present.
    pub fn validate(&self) -> Result<(), ListingError> {
        if self.source.platform.trim().is_empty() {
            return Err(ListingError::EmptyPlatform);
        }
        if self.price.amount < 0.0 {
            return Err(ListingError::NegativePrice(self.price.amount));
        }
        if let Some(point) = &self.location.coordinates {
            if !point.in_bounds() {
                return Err(ListingError::CoordinatesOutOfBounds {
                    lat: point.lat,
                    lon: point.lon,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> NormalizedListing {
        NormalizedListing {
            listing_id: Uuid::new_v4(),
            source: ListingSource {
                platform: "idealista".into(),
                url: Some("https://example.test/l/1".into()),
                external_id: Some("l-1".into()),
                scraped_at: Utc::now(),
            },
            listing_type: ListingType::Sale,
            property_type: PropertyType::Apartment,
            location: Location {
                country: Some("PT".into()),
                region: None,
                city: "Lisboa".into(),
                postal_code: None,
                address: None,
                coordinates: Some(GeoPoint { lat: 38.72, lon: -9.14 }),
            },
            price: Price {
                amount: 500_000.0,
                currency: "EUR".into(),
                period: None,
            },
            details: PropertyDetails::default(),
            media: Vec::new(),
            seller: Seller {
                name: None,
                phone: None,
                email: None,
                seller_type: SellerType::Agency,
            },
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_listing_passes() {
        assert!(listing().validate().is_ok());
    }

    #[test]
    fn negative_price_fails() {
        let mut l = listing();
        l.price.amount = -1.0;
        assert_eq!(l.validate(), Err(ListingError::NegativePrice(-1.0)));
    }

    #[test]
    fn empty_platform_fails() {
        let mut l = listing();
        l.source.platform = "  ".into();
        assert_eq!(l.validate(), Err(ListingError::EmptyPlatform));
    }

    #[test]
    fn out_of_bounds_coordinates_fail() {
        let mut l = listing();
        l.location.coordinates = Some(GeoPoint { lat: 120.0, lon: 0.0 });
        assert!(matches!(
            l.validate(),
            Err(ListingError::CoordinatesOutOfBounds { .. })
        ));
    }

    #[test]
    fn listing_type_serializes_under_type_key() {
        let json = serde_json::to_value(listing()).unwrap();
        assert_eq!(json["type"], "sale");
    }
}
