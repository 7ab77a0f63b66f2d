//! Parcel API error taxonomy.
//!
//! Every failure of the API client is folded into one of a few kinds so the
//! coordinator can decide how to react without knowing transport details.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Message returned to callers when the upstream quota is exhausted.
pub const RATE_LIMIT_MESSAGE: &str =
    "You were rate limited, please do not send more than 20 requests per hour.";

/// Upper bound on how much of an error body is kept in messages.
const MAX_BODY_CHARS: usize = 200;

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// Network failure, timeout, or unexpected HTTP status.
    Transport,
    /// Invalid or expired API key.
    Auth,
    /// Upstream quota exceeded.
    RateLimited,
    /// The response envelope could not be decoded.
    MalformedResponse,
    /// Well-formed response reporting `success: false`.
    Rejected,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::MalformedResponse => "malformed_response",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a Parcel API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Transport(_) => ApiErrorKind::Transport,
            Self::Auth(_) => ApiErrorKind::Auth,
            Self::RateLimited(_) => ApiErrorKind::RateLimited,
            Self::MalformedResponse(_) => ApiErrorKind::MalformedResponse,
            Self::Rejected(_) => ApiErrorKind::Rejected,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport(m)
            | Self::Auth(m)
            | Self::RateLimited(m)
            | Self::MalformedResponse(m)
            | Self::Rejected(m) => m,
        }
    }

    /// Classify a non-2xx HTTP response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body.trim()));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(RATE_LIMIT_MESSAGE.to_string()),
            _ => Self::Transport(detail),
        }
    }

    /// Classify an envelope that decoded fine but reported `success: false`.
    pub fn from_envelope_message(message: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "request was not successful".to_string());
        let lower = message.to_lowercase();

        if lower.contains("rate limit") || lower.contains("too many requests") {
            Self::RateLimited(message)
        } else if lower.contains("api key")
            || lower.contains("api-key")
            || lower.contains("unauthorized")
            || lower.contains("authenticat")
        {
            Self::Auth(message)
        } else {
            Self::Rejected(message)
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(MAX_BODY_CHARS).collect();
        cut.push('…');
        cut
    }
}
