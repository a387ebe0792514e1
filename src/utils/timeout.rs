//! Bounded waits for threads and child processes
//!
//! Stopping a worker is only complete once it has been joined or reaped;
//! these helpers poll for completion until a deadline instead of blocking
//! indefinitely.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound for joining a stopped worker or reaping a stopped child
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Join `handle` if the thread finishes within `timeout`
///
/// On timeout the handle is given back so the caller can decide what to do.
pub fn join_within<T>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> Result<thread::Result<T>, JoinHandle<T>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(handle.join())
}

/// Reap `child` if it exits within `timeout`; `Ok(None)` on timeout
pub fn wait_within(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
