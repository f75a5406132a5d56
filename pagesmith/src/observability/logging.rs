//! Subscriber installation for binaries and tests that embed the orchestrator.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "pagesmith=info";

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per event, span fields flattened in.
    Json,
}

/// Installs a global `tracing` subscriber.
///
/// Respects `RUST_LOG`, falling back to [`DEFAULT_FILTER`]. The library never
/// calls this itself.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_serde() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), r#""json""#);
        let parsed: LogFormat = serde_json::from_str(r#""compact""#).unwrap();
        assert_eq!(parsed, LogFormat::Compact);
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever call comes first may win; the second must report an error.
        let first = init_tracing(LogFormat::Compact);
        let second = init_tracing(LogFormat::Json);
        assert!(first.is_err() || second.is_err());
    }
}
