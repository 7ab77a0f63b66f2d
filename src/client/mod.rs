//! Parcel API client.
//!
//! The coordinator only depends on the [`DeliveryApi`] trait; the production
//! implementation is [`ParcelAppClient`], which talks to
//! `https://api.parcel.app/external` over `reqwest`.
//!
//! The client is deliberately thin: no retries, no backoff, no caching. The
//! coordinator's polling interval is the only throttle.

mod error;
mod parcel_app;
#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
pub use error::{ApiError, ApiErrorKind, RATE_LIMIT_MESSAGE};
pub use parcel_app::{API_KEY_HEADER, DEFAULT_BASE_URL, ParcelAppClient};
use serde::{Deserialize, Serialize};

/// Which deliveries the API returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Deliveries that are still being tracked.
    #[default]
    Active,
    /// Recently updated deliveries, including completed ones.
    Recent,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recent => "recent",
        }
    }
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "recent" => Ok(Self::Recent),
            other => Err(format!(
                "invalid filter mode '{other}', expected 'active' or 'recent'"
            )),
        }
    }
}

/// Request body for adding a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelivery {
    pub tracking_number: String,
    pub carrier_code: String,
    pub description: String,
    /// ISO 639-1 language code for carrier messages.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub send_push_confirmation: bool,
}

impl NewDelivery {
    pub fn new(
        tracking_number: impl Into<String>,
        carrier_code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            carrier_code: carrier_code.into(),
            description: description.into(),
            language: default_language(),
            send_push_confirmation: false,
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

/// Operations the coordinator needs from the Parcel API.
#[async_trait]
pub trait DeliveryApi: Send + Sync {
    /// Fetch the raw `deliveries` array for the given filter.
    ///
    /// Entries are returned undecoded so that one malformed entry does not
    /// fail the whole response.
    async fn fetch_deliveries(
        &self,
        filter_mode: FilterMode,
    ) -> Result<Vec<serde_json::Value>, ApiError>;

    /// Ask the API to start tracking a new delivery.
    async fn submit_delivery(&self, delivery: &NewDelivery) -> Result<(), ApiError>;
}
