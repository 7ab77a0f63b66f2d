//! Delivery retention configuration.
//!
//! Completed deliveries are dropped from the snapshot once their expected
//! delivery date is older than the threshold.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! threshold_days = 3
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether completed deliveries are evicted.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Days after the expected date before a completed delivery is evicted.
    /// Default: 3
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_days: default_threshold_days(),
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.threshold_days > 3650 {
            return Err(ConfigError::Validation(format!(
                "retention.threshold_days must be at most 3650, got {}",
                self.threshold_days
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold_days() -> u32 {
    crate::coordinator::DEFAULT_THRESHOLD_DAYS
}
