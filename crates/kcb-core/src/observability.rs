//! Observability infrastructure.
//!
//! Logging is configured exactly once, at process start, by whoever hosts the
//! task handler. Constructing an orchestrator client or a task never installs
//! subscribers as a side effect.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(crate::Error::config(format!(
                "unknown log format '{other}' (expected json or pretty)"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `kcb_builder=debug`)
///
/// # Example
///
/// ```rust
/// use kcb_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span covering one hub task.
///
/// # Example
///
/// ```rust
/// use kcb_core::observability::task_span;
///
/// let span = task_span("buildContainer", 1234);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn task_span(method: &str, task_id: u64) -> Span {
    tracing::info_span!("task", method = method, task_id = task_id)
}

/// Creates a span for work tied to one orchestrator build.
///
/// Both the log reader and the upload loop run inside a span built here so
/// their events correlate on `build_id`.
#[must_use]
pub fn build_span(task_id: u64, build_id: &str) -> Span {
    tracing::info_span!("build", task_id = task_id, build_id = build_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        // Should not panic (uses Once internally)
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // Second call should be no-op
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = task_span("buildContainer", 1);
        let _guard = span.enter();
        let inner = build_span(1, "build-1");
        let _inner_guard = inner.enter();
        tracing::info!("message in nested spans");
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().ok(), Some(LogFormat::Json));
        assert_eq!(" pretty ".parse::<LogFormat>().ok(), Some(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
