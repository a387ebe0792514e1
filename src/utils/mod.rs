//! Process-level helpers: logging, shutdown signals, bounded waits

pub mod logging;
pub mod signal;
pub mod timeout;
pub mod validation;

pub use logging::{init_logging, init_logging_from_config, resolve_filter};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use signal::{cancel_on_shutdown_signal, wait_for_shutdown_signal};
pub use timeout::{join_within, wait_within, STOP_TIMEOUT};
pub use validation::{ensure_invariant, fatal};
