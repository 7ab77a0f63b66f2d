//! Configuration module for parcelsync.
//!
//! parcelsync is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [parcel]
//! api_key = "${PARCEL_API_KEY}"
//! poll_interval_secs = 300
//!
//! [retention]
//! threshold_days = 3
//!
//! [observability.logging]
//! format = "json"
//! ```

mod observability;
mod parcel;
mod retention;

use std::path::Path;

pub use observability::*;
pub use parcel::*;
pub use retention::*;
use serde::{Deserialize, Serialize};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "parcelsync.toml";

/// Config written by `parcelsync init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# parcelsync configuration

[parcel]
# API key from https://web.parcelapp.net (Settings > API).
api_key = "${PARCEL_API_KEY}"
# The Parcel API allows 20 requests per hour; keep this at 180 or above.
poll_interval_secs = 300
# "active" or "recent"
filter_mode = "active"
request_timeout_secs = 30

[retention]
enabled = true
# Completed deliveries are dropped this many days after their expected date.
threshold_days = 3

[observability.logging]
level = "info"
# "pretty", "compact" or "json"
format = "compact"
"#;

/// Root configuration.
///
/// `[parcel]` is required; every other section has defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParcelSyncConfig {
    /// Parcel API connection and polling.
    pub parcel: ParcelConfig,

    /// Eviction of completed deliveries.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ParcelSyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: ParcelSyncConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parcel.validate()?;
        self.retention.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        // Only expand variables that appear before any comment
        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::client::FilterMode;

    #[test]
    fn test_minimal_config() {
        let config = ParcelSyncConfig::from_str(
            r#"
            [parcel]
            api_key = "test-key"
        "#,
        )
        .unwrap();

        assert_eq!(config.parcel.api_key, "test-key");
        assert_eq!(config.parcel.poll_interval_secs, 300);
        assert_eq!(config.parcel.filter_mode, FilterMode::Active);
        assert!(config.retention.enabled);
        assert_eq!(config.retention.threshold_days, 3);
        assert_eq!(config.observability.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_full_config() {
        let config = ParcelSyncConfig::from_str(
            r#"
            [parcel]
            api_key = "test-key"
            poll_interval_secs = 600
            filter_mode = "recent"
            base_url = "http://localhost:8080/external"
            request_timeout_secs = 5

            [retention]
            enabled = false
            threshold_days = 10

            [observability.logging]
            level = "debug"
            format = "json"
            timestamps = false
            filter = "parcelsync=trace"
        "#,
        )
        .unwrap();

        assert_eq!(config.parcel.poll_interval_secs, 600);
        assert_eq!(config.parcel.filter_mode, FilterMode::Recent);
        assert_eq!(config.parcel.base_url, "http://localhost:8080/external");
        assert_eq!(config.parcel.request_timeout_secs, 5);
        assert!(!config.retention.enabled);
        assert_eq!(config.retention.threshold_days, 10);
        assert_eq!(config.observability.logging.level, LogLevel::Debug);
        assert_eq!(config.observability.logging.format, LogFormat::Json);
        assert!(!config.observability.logging.timestamps);
    }

    #[test]
    fn test_missing_parcel_section() {
        let err = ParcelSyncConfig::from_str("[retention]\nenabled = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ParcelSyncConfig::from_str(
            r#"
            [parcel]
            api_key = "test-key"
            poll_intervall_secs = 60
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll_intervall_secs"));
    }

    #[test]
    fn test_invalid_filter_mode() {
        let err = ParcelSyncConfig::from_str(
            r#"
            [parcel]
            api_key = "test-key"
            filter_mode = "everything"
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = ParcelSyncConfig::from_str(
            r#"
            [parcel]
            api_key = "test-key"
            poll_interval_secs = 0
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_template_parses() {
        temp_env::with_var("PARCEL_API_KEY", Some("from-env"), || {
            let config = ParcelSyncConfig::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
            assert_eq!(config.parcel.api_key, "from-env");
            assert_eq!(config.parcel.poll_interval_secs, 300);
        });
    }

    #[test]
    fn test_template_requires_env_var() {
        temp_env::with_var_unset("PARCEL_API_KEY", || {
            let err = ParcelSyncConfig::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(ref v) if v == "PARCEL_API_KEY"));
        });
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[parcel]\napi_key = \"file-key\"").unwrap();

        let config = ParcelSyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.parcel.api_key, "file-key");
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ParcelSyncConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_API_KEY", Some("sk-secret"), || {
            let result = expand_env_vars("key = \"${TEST_API_KEY}\"").unwrap();
            assert_eq!(result, "key = \"sk-secret\"");
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# api_key = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# api_key = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_env_var_before_comment_expanded() {
        temp_env::with_var("TEST_BEFORE_COMMENT", Some("expanded"), || {
            let result =
                expand_env_vars("key = \"${TEST_BEFORE_COMMENT}\" # comment here").unwrap();
            assert_eq!(result, "key = \"expanded\" # comment here");
        });
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }
}
