//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Build the default filter directive for a configured log level
pub fn default_directive(level: &str) -> String {
    format!("phaseshift={},tower_http=debug", level)
}

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently ignored.
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Examples
///
/// ```no_run
/// phaseshift::telemetry::init("info");
/// tracing::info!("Controller started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_crate_level() {
        assert_eq!(
            default_directive("warn"),
            "phaseshift=warn,tower_http=debug"
        );
    }

    #[test]
    fn test_default_directive_is_a_valid_filter() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(EnvFilter::try_new(default_directive(level)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_ignored() {
        init("info");
        init("debug");
    }
}
