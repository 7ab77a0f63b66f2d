//! Delivery record model.
//!
//! A [`DeliveryRecord`] is the normalized, immutable view of one parcel as
//! reported by a single poll. Records are identified by their
//! [`DeliveryKey`] (tracking number plus carrier code); later polls replace
//! the whole record, never individual fields.

mod record;
mod status;

pub use record::{
    DeliveryKey, DeliveryRecord, MalformedRecord, PLACEHOLDER_CARRIER, RawDelivery, TrackingEvent,
    parse_api_date,
};
pub use status::DeliveryStatus;
