//! Parcel API connection settings.
//!
//! # Example
//!
//! ```toml
//! [parcel]
//! api_key = "${PARCEL_API_KEY}"
//! poll_interval_secs = 300
//! filter_mode = "active"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::client::{DEFAULT_BASE_URL, FilterMode};

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParcelConfig {
    /// Account API key from the Parcel web app.
    pub api_key: String,

    /// Seconds between polls.
    /// Default: 300. Values below 180 risk the 20 requests/hour limit.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Which deliveries to fetch.
    /// Default: active
    #[serde(default)]
    pub filter_mode: FilterMode,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    /// Default: 30
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for ParcelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParcelConfig")
            .field("api_key", &"<redacted>")
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("filter_mode", &self.filter_mode)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ParcelConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            poll_interval_secs: default_poll_interval_secs(),
            filter_mode: FilterMode::default(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "parcel.api_key must not be empty".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "parcel.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "parcel.request_timeout_secs must be greater than 0".into(),
            ));
        }

        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Validation(format!(
                "parcel.base_url '{}' is not a valid URL: {e}",
                self.base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "parcel.base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(())
    }
}

fn default_poll_interval_secs() -> u64 {
    crate::coordinator::DEFAULT_POLL_INTERVAL_SECS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ParcelConfig::new("key");
        assert_eq!(config.poll_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.filter_mode, FilterMode::Active);
        assert_eq!(config.base_url, "https://api.parcel.app/external");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let debug = format!("{:?}", ParcelConfig::new("super-secret"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ParcelConfig::new("  ");
        assert!(config.validate().is_err());

        config.api_key = "key".into();
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        config.poll_interval_secs = 60;
        assert!(config.validate().is_ok());

        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.request_timeout_secs = 10;
        config.base_url = "not a url".into();
        assert!(config.validate().is_err());

        config.base_url = "ftp://api.parcel.app".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }
}
