//! Process-wide logging setup.
//!
//! `log` macros are bridged into `tracing`, so both end up in the same
//! subscriber together with the cycle and record spans.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set to `json` for one JSON object per line.
pub const LOG_FORMAT_ENV: &str = "FESTIVAL_OCR_LOG_FORMAT";

const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// level. Calling it again is a no-op.
pub fn init_logging(format: LogFormat) {
    let _ = tracing_log::LogTracer::init();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_ansi(false))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false))
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_log_format_from_env() {
        std::env::remove_var(LOG_FORMAT_ENV);
        assert_eq!(LogFormat::from_env(), LogFormat::Text);

        std::env::set_var(LOG_FORMAT_ENV, "JSON");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);

        std::env::set_var(LOG_FORMAT_ENV, "pretty");
        assert_eq!(LogFormat::from_env(), LogFormat::Text);

        std::env::remove_var(LOG_FORMAT_ENV);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LogFormat::Text);
        init_logging(LogFormat::Json);
        log::info!("still logging");
    }
}
