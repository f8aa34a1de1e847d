//! # Event and Listing Model
//!
//! The value types every other subsystem trades in: the canonical listing
//! model that source-portal scrapes normalize into, the event envelope that
//! wraps every queued message, the typed event bodies, and the trace context
//! that ties log lines back to the request or scrape that started them.
//!
//! Everything here is a plain serde value. Events are immutable once
//! emitted; processing produces new events rather than mutating old ones.

mod envelope;
mod event;
mod listing;
mod trace;

pub use envelope::{EventEnvelope, EventStatus, EventType, ENVELOPE_VERSION};
pub use event::{
    Event, FraudDetectedBody, ProcessingFailedBody, ProcessedListingBody, RawListingBody,
    RiskLevel, RiskSignal,
};
pub use listing::{
    GeoPoint, ListingError, ListingSource, ListingType, Location, MediaItem, MediaKind,
    NormalizedListing, Price, PricePeriod, PropertyDetails, PropertyType, Seller, SellerType,
};
pub use trace::TraceContext;
