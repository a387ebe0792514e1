//! Logging initialization
//!
//! Logs go to stderr so that the `stdio` interface can own stdout.
//! `RUST_LOG` always takes precedence over a filter from the command line
//! or the config file; with neither, the level is `info`.
//!
//! ```rust,no_run
//! use pppoat::utils::init_logging;
//!
//! init_logging(Some("pppoat::transport=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info";

/// Pick the filter directive to install
///
/// `env` is the value of `RUST_LOG`, if set.
pub fn resolve_filter(env: Option<&str>, configured: Option<&str>) -> String {
    env.or(configured).unwrap_or(DEFAULT_FILTER).to_string()
}

fn env_filter(configured: Option<&str>) -> EnvFilter {
    let env = std::env::var("RUST_LOG").ok();
    let directive = resolve_filter(env.as_deref(), configured);
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid log filter '{}': {}", directive, e);
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Initialize human-readable logging
///
/// Must be called at most once per process.
pub fn init_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var_os("NO_COLOR").is_none()),
        )
        .with(env_filter(filter))
        .init();
}

/// Initialize logging with one JSON object per event
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        )
        .with(env_filter(filter))
        .init();
}

/// Initialize logging from the `[logging]` table
///
/// `override_filter` (from `--log-filter`) wins over the table's filter.
pub fn init_logging_from_config(config: Option<&LoggingConfig>, override_filter: Option<&str>) {
    let filter = override_filter.or_else(|| config.and_then(|c| c.filter.as_deref()));

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
            return;
        }
        #[cfg(not(feature = "json-logging"))]
        eprintln!("JSON logging requested but the json-logging feature is disabled");
    }
    init_logging(filter);
}
