//! Invariant checks
//!
//! Violations of lifecycle invariants (a worker that cannot be joined, a
//! child that cannot be signalled or reaped) leave descriptors or threads
//! in an unknown state. They are reported once and the process stops.

use tracing::error;

/// Log `context` as an invariant violation and abort the current thread
///
/// With the release profile's `panic = "abort"` this terminates the process.
#[track_caller]
pub fn fatal(context: &str) -> ! {
    error!("Invariant violation: {}", context);
    panic!("invariant violation: {}", context);
}

/// Call [`fatal`] unless `condition` holds
#[track_caller]
pub fn ensure_invariant(condition: bool, context: &str) {
    if !condition {
        fatal(context);
    }
}
