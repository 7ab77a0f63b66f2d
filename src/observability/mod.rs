//! Observability: structured logging through `tracing`.
//!
//! Log output is configured by `[observability.logging]`: level, format
//! (pretty, compact, JSON), timestamps, file/line, and filter directives.
//! `RUST_LOG` overrides the configured level and filter.

mod tracing_init;

pub use tracing_init::*;
