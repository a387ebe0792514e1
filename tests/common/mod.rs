//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::time::{Duration, Instant};

use pppoat::bridge::{pipe, poll_readable, FdIo};
use pppoat::module::{ModuleContext, Role};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A pipe as `(read, write)`
pub fn test_pipe() -> (OwnedFd, OwnedFd) {
    pipe().expect("pipe")
}

pub fn context(role: Role, pairs: &[(&str, &str)]) -> ModuleContext {
    ModuleContext::new(role, options(pairs))
}

pub fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn write_fd(fd: &OwnedFd, data: &[u8]) {
    FdIo(fd).write_all(data).expect("write");
}

/// Read exactly `len` bytes, failing the test after `TEST_TIMEOUT`
pub fn read_exact_timeout(fd: &OwnedFd, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + TEST_TIMEOUT;
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 4096];
    while out.len() < len {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "timed out after {} of {} bytes", out.len(), len);
        if !poll_readable(&[fd.as_fd()], remaining).expect("poll")[0] {
            continue;
        }
        let want = (len - out.len()).min(buf.len());
        let n = FdIo(fd).read(&mut buf[..want]).expect("read");
        assert!(n > 0, "unexpected end of stream after {} bytes", out.len());
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Read whatever is available without blocking
pub fn read_available(fd: &OwnedFd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    while poll_readable(&[fd.as_fd()], Duration::ZERO).expect("poll")[0] {
        let n = FdIo(fd).read(&mut buf).expect("read");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Whether the other end of a pipe has been closed
pub fn reaches_eof(fd: &OwnedFd) -> bool {
    if !poll_readable(&[fd.as_fd()], TEST_TIMEOUT).expect("poll")[0] {
        return false;
    }
    let mut buf = [0u8; 64];
    matches!(FdIo(fd).read(&mut buf), Ok(0))
}
