//! Tracing initialization with configurable logging formats.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

/// Initialize the global tracing subscriber.
///
/// This sets up:
/// - Console logging with configurable format (pretty, compact, JSON)
/// - Environment-based log filtering
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingError> {
    let logging = &config.logging;
    let filter = build_env_filter(logging);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(logging.file_line)
                .with_line_number(logging.file_line);
            registry.with(fmt_layer).try_init()
        }
        (LogFormat::Pretty, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(logging.file_line)
                .with_line_number(logging.file_line)
                .without_time();
            registry.with(fmt_layer).try_init()
        }
        (LogFormat::Compact, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_file(logging.file_line)
                .with_line_number(logging.file_line);
            registry.with(fmt_layer).try_init()
        }
        (LogFormat::Compact, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_file(logging.file_line)
                .with_line_number(logging.file_line)
                .without_time();
            registry.with(fmt_layer).try_init()
        }
        (LogFormat::Json, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_file(logging.file_line)
                .with_line_number(logging.file_line)
                .with_current_span(logging.include_spans);
            registry.with(fmt_layer).try_init()
        }
        (LogFormat::Json, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_file(logging.file_line)
                .with_line_number(logging.file_line)
                .with_current_span(logging.include_spans)
                .without_time();
            registry.with(fmt_layer).try_init()
        }
    };

    result.map_err(|e| TracingError::Init(e.to_string()))
}

/// Build the environment filter from logging config.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_new(filter_directives(config, std::env::var("RUST_LOG").ok()))
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Filter directives in priority order: `RUST_LOG`, then the configured
/// level plus filter, then the level with noisy HTTP crates quieted.
fn filter_directives(config: &LoggingConfig, rust_log: Option<String>) -> String {
    let base_level = config.level.as_str();

    if let Some(env_filter) = rust_log.filter(|f| !f.trim().is_empty()) {
        env_filter
    } else if let Some(filter) = &config.filter {
        format!("{},{}", base_level, filter)
    } else {
        format!("{},hyper=warn,h2=warn,rustls=warn,reqwest=warn", base_level)
    }
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_rust_log_wins() {
        let config = LoggingConfig {
            filter: Some("parcelsync=trace".into()),
            ..LoggingConfig::default()
        };
        assert_eq!(
            filter_directives(&config, Some("warn".into())),
            "warn".to_string()
        );
    }

    #[test]
    fn test_configured_filter_is_appended_to_level() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            filter: Some("parcelsync=trace".into()),
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directives(&config, None), "debug,parcelsync=trace");
    }

    #[test]
    fn test_default_quiets_http_crates() {
        let directives = filter_directives(&LoggingConfig::default(), Some(String::new()));
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }
}
