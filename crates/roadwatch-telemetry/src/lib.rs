//! Structured logging setup for the roadwatch binary.
//!
//! Output goes to stdout as JSON lines by default, or as human-readable
//! text when [`LogFormat::Pretty`] is configured. `RUST_LOG` takes priority
//! over the configured level and per-module overrides.

use roadwatch_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter directive string from settings, e.g.
/// `info,roadwatch_vision=debug`.
pub fn filter_directives(settings: &LoggingSettings) -> String {
    let mut filter = settings.level.trim().to_lowercase();
    if filter.is_empty() {
        filter.push_str("info");
    }
    for (module, level) in &settings.module_levels {
        filter.push_str(&format!(",{}={}", module, level.trim().to_lowercase()));
    }
    filter
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(settings: &LoggingSettings) -> Result<(), TryInitError> {
    let directives = filter_directives(settings);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn directives_default_level_only() {
        let settings = LoggingSettings::default();
        assert_eq!(filter_directives(&settings), "info");
    }

    #[test]
    fn directives_include_module_levels() {
        let settings = LoggingSettings {
            level: "WARN".to_string(),
            format: LogFormat::Pretty,
            module_levels: BTreeMap::from([
                ("roadwatch_server".to_string(), "debug".to_string()),
                ("roadwatch_vision".to_string(), "Trace".to_string()),
            ]),
        };
        assert_eq!(
            filter_directives(&settings),
            "warn,roadwatch_server=debug,roadwatch_vision=trace"
        );
    }

    #[test]
    fn directives_parse_as_env_filter() {
        let settings = LoggingSettings {
            module_levels: BTreeMap::from([("roadwatch_server".to_string(), "debug".to_string())]),
            ..LoggingSettings::default()
        };
        assert!(EnvFilter::try_new(filter_directives(&settings)).is_ok());
    }

    #[test]
    fn empty_level_falls_back_to_info() {
        let settings = LoggingSettings {
            level: "  ".to_string(),
            ..LoggingSettings::default()
        };
        assert_eq!(filter_directives(&settings), "info");
    }
}
