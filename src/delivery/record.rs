//! Normalization of raw API delivery entries into [`DeliveryRecord`]s.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use super::DeliveryStatus;

/// Carrier code the Parcel API uses for manually-entered deliveries.
pub const PLACEHOLDER_CARRIER: &str = "pholder";

/// Date format used by the Parcel API for `date_expected` and event dates.
const API_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Natural key of a delivery: the carrier-assigned tracking number together
/// with the carrier code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub tracking_number: String,
    pub carrier_code: String,
}

impl DeliveryKey {
    pub fn new(tracking_number: impl Into<String>, carrier_code: impl Into<String>) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            carrier_code: carrier_code.into(),
        }
    }
}

impl std::fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tracking_number, self.carrier_code)
    }
}

/// A delivery entry as it appears in the API's `deliveries` array.
///
/// Every field is optional so that a partially filled entry still decodes;
/// [`DeliveryRecord::from_raw`] decides what is required. Only the key fields
/// are type-checked strictly: any other field holding an unexpected JSON type
/// decodes as `None`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDelivery {
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier_code: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status_code: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub date_expected: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub date_expected_end: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp_expected: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp_expected_end: Option<i64>,
    #[serde(default, deserialize_with = "lenient_events")]
    pub events: Option<Vec<TrackingEvent>>,
    #[serde(default, deserialize_with = "lenient")]
    pub extra_information: Option<String>,
}

/// One tracking event reported by the carrier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Free-text event description.
    #[serde(default, deserialize_with = "lenient")]
    pub event: Option<String>,
    /// Event time as sent by the API.
    #[serde(default, deserialize_with = "lenient")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub additional: Option<String>,
}

/// Decode an optional field, mapping a value of the wrong type to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Decode the event list, skipping entries that are not event objects.
fn lenient_events<'de, D>(deserializer: D) -> Result<Option<Vec<TrackingEvent>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

impl TrackingEvent {
    /// Parsed event time, if the API's date string is understood.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.date.as_deref().and_then(parse_api_date)
    }
}

/// Why a raw entry could not become a [`DeliveryRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    #[error("delivery entry is missing `{0}`")]
    MissingField(&'static str),

    #[error("delivery entry could not be decoded: {0}")]
    Undecodable(String),
}

/// Normalized representation of one tracked parcel at one poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRecord {
    pub tracking_number: String,
    pub carrier_code: String,
    pub description: Option<String>,
    pub status: DeliveryStatus,
    pub date_expected: Option<DateTime<Utc>>,
    pub date_expected_end: Option<DateTime<Utc>>,
    pub timestamp_expected: Option<i64>,
    pub timestamp_expected_end: Option<i64>,
    /// Events in API order (newest first).
    pub events: Vec<TrackingEvent>,
    pub extra_information: Option<String>,
}

impl DeliveryRecord {
    /// Decode and normalize one element of the API's `deliveries` array.
    pub fn from_value(value: serde_json::Value) -> Result<Self, MalformedRecord> {
        let raw: RawDelivery = serde_json::from_value(value)
            .map_err(|e| MalformedRecord::Undecodable(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Normalize a decoded entry.
    ///
    /// Fails only when a key field is missing or blank. Dates that do not
    /// parse are dropped rather than rejected.
    pub fn from_raw(raw: RawDelivery) -> Result<Self, MalformedRecord> {
        let tracking_number = non_blank(raw.tracking_number)
            .ok_or(MalformedRecord::MissingField("tracking_number"))?;
        let carrier_code =
            non_blank(raw.carrier_code).ok_or(MalformedRecord::MissingField("carrier_code"))?;

        let date_expected = resolve_date(raw.date_expected.as_deref(), raw.timestamp_expected);
        let date_expected_end =
            resolve_date(raw.date_expected_end.as_deref(), raw.timestamp_expected_end);

        Ok(Self {
            tracking_number,
            carrier_code,
            description: non_blank(raw.description),
            status: DeliveryStatus::from_code(raw.status_code),
            date_expected,
            date_expected_end,
            timestamp_expected: raw.timestamp_expected,
            timestamp_expected_end: raw.timestamp_expected_end,
            events: raw.events.unwrap_or_default(),
            extra_information: raw.extra_information,
        })
    }

    pub fn key(&self) -> DeliveryKey {
        DeliveryKey::new(&self.tracking_number, &self.carrier_code)
    }

    /// Description when present, otherwise the tracking number.
    pub fn display_name(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.tracking_number)
    }

    pub fn is_placeholder(&self) -> bool {
        self.carrier_code == PLACEHOLDER_CARRIER
    }

    /// Most recent tracking event.
    pub fn latest_event(&self) -> Option<&TrackingEvent> {
        self.events.first()
    }

    /// Location of the most recent tracking event.
    pub fn latest_location(&self) -> Option<&str> {
        self.latest_event().and_then(|e| e.location.as_deref())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_date(text: Option<&str>, unix_secs: Option<i64>) -> Option<DateTime<Utc>> {
    text.and_then(parse_api_date)
        .or_else(|| unix_secs.and_then(|secs| DateTime::from_timestamp(secs, 0)))
}

/// Parse a date as the Parcel API formats it.
///
/// Accepts `YYYY-MM-DD HH:MM:SS` (read as UTC), RFC 3339, and a bare
/// `YYYY-MM-DD` (midnight UTC).
pub fn parse_api_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, API_DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
