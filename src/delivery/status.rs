//! Parcel delivery status codes.

use serde::{Deserialize, Serialize};

/// Authoritative state of a parcel as reported by the Parcel API.
///
/// The API encodes status as an integer in `0..=8`. Codes outside that range
/// (or a missing code) are kept as [`DeliveryStatus::Unknown`] so the delivery
/// stays trackable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Completed,
    Frozen,
    InTransit,
    AwaitingPickup,
    OutForDelivery,
    NotFound,
    FailedAttempt,
    Exception,
    CarrierInfoReceived,
    /// Missing or unrecognized status code (raw value kept when present).
    Unknown(Option<i64>),
}

impl DeliveryStatus {
    /// Map a raw API status code.
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => Self::Completed,
            Some(1) => Self::Frozen,
            Some(2) => Self::InTransit,
            Some(3) => Self::AwaitingPickup,
            Some(4) => Self::OutForDelivery,
            Some(5) => Self::NotFound,
            Some(6) => Self::FailedAttempt,
            Some(7) => Self::Exception,
            Some(8) => Self::CarrierInfoReceived,
            other => Self::Unknown(other),
        }
    }

    /// The raw status code, if one was reported.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Completed => Some(0),
            Self::Frozen => Some(1),
            Self::InTransit => Some(2),
            Self::AwaitingPickup => Some(3),
            Self::OutForDelivery => Some(4),
            Self::NotFound => Some(5),
            Self::FailedAttempt => Some(6),
            Self::Exception => Some(7),
            Self::CarrierInfoReceived => Some(8),
            Self::Unknown(code) => *code,
        }
    }

    /// Display name used as the sensor state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Frozen => "frozen",
            Self::InTransit => "in_transit",
            Self::AwaitingPickup => "awaiting_pickup",
            Self::OutForDelivery => "out_for_delivery",
            Self::NotFound => "not_found",
            Self::FailedAttempt => "failed_attempt",
            Self::Exception => "exception",
            Self::CarrierInfoReceived => "carrier_info_received",
            Self::Unknown(_) => "unknown",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
