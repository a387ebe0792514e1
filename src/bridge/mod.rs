//! Byte-bridge engine
//!
//! Moves bytes between descriptor pairs in fixed-size chunks. Reads are
//! only attempted after `poll(2)` reports the source ready; writes are
//! retried until the whole chunk is accepted, waiting for the sink to
//! drain when it reports `WouldBlock`. A cooperative stop token is checked
//! between iterations and while waiting.

pub mod sys;

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use sys::{is_open, pipe, poll_readable, set_nonblocking, wait_writable, FdIo};

/// Largest number of bytes moved per read
pub const CHUNK_SIZE: usize = 4096;

/// Upper bound on any single wait for readiness
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Stream closed by the other end")]
    Closed,

    #[error("Stopped while waiting for the sink to drain")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One side of a bridge direction
#[derive(Debug)]
pub enum Endpoint {
    /// Closed when the endpoint drops
    Owned(OwnedFd),
    /// Process-lifetime descriptor that is never closed (host stdio)
    Borrowed(BorrowedFd<'static>),
}

impl Endpoint {
    pub fn stdin() -> Self {
        // SAFETY: the standard input descriptor stays open for the whole
        // process lifetime and is never closed through this endpoint.
        Endpoint::Borrowed(unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) })
    }

    pub fn stdout() -> Self {
        // SAFETY: as for stdin.
        Endpoint::Borrowed(unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) })
    }
}

impl AsFd for Endpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Endpoint::Owned(fd) => fd.as_fd(),
            Endpoint::Borrowed(fd) => fd.as_fd(),
        }
    }
}

impl From<OwnedFd> for Endpoint {
    fn from(fd: OwnedFd) -> Self {
        Endpoint::Owned(fd)
    }
}

/// `WouldBlock` and `Interrupted` are retried, everything else is fatal
pub fn is_recoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Write the whole of `buf` to `sink`
///
/// Partial writes are continued from where they stopped. On `WouldBlock`
/// the `wait` callback is invoked before retrying; it is expected to block
/// for a bounded time and to fail once the caller should give up.
pub fn write_all<W>(
    sink: &mut W,
    mut buf: &[u8],
    wait: &mut dyn FnMut() -> Result<(), BridgeError>,
) -> Result<(), BridgeError>
where
    W: Write + ?Sized,
{
    while !buf.is_empty() {
        match sink.write(buf) {
            Ok(0) => {
                return Err(BridgeError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                )))
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_recoverable(&e) => wait()?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Move at most one chunk from `source` to `sink`
///
/// Returns the number of bytes moved; `Ok(0)` means the source had nothing
/// to offer right now. End-of-stream on the source is `BridgeError::Closed`.
pub fn transfer<R, W>(
    source: &mut R,
    sink: &mut W,
    buf: &mut [u8],
    wait: &mut dyn FnMut() -> Result<(), BridgeError>,
) -> Result<usize, BridgeError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let n = loop {
        match source.read(buf) {
            Ok(0) => return Err(BridgeError::Closed),
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_recoverable(&e) => return Ok(0),
            Err(e) => return Err(e.into()),
        }
    };
    write_all(sink, &buf[..n], wait)?;
    Ok(n)
}

/// Build a `wait` callback that blocks until `fd` is writable
///
/// Each poll is bounded by `timeout`; the stop token is re-checked between
/// polls so a stuck sink cannot hold the caller past a stop request.
pub fn writable_waiter<'a>(
    fd: BorrowedFd<'a>,
    timeout: Duration,
    stop: &'a CancellationToken,
) -> impl FnMut() -> Result<(), BridgeError> + 'a {
    move || loop {
        if stop.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        if wait_writable(fd, timeout)? {
            return Ok(());
        }
        trace!("Sink still full after {:?}", timeout);
    }
}

struct Direction {
    source: Endpoint,
    sink: Endpoint,
}

/// A set of unidirectional copies driven by one thread
pub struct Bridge {
    directions: Vec<Direction>,
    timeout: Duration,
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            directions: Vec::new(),
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a `source -> sink` copy
    pub fn direction(mut self, source: impl Into<Endpoint>, sink: impl Into<Endpoint>) -> Self {
        self.directions.push(Direction {
            source: source.into(),
            sink: sink.into(),
        });
        self
    }

    /// Copy until `stop` is cancelled or a fatal error occurs
    ///
    /// Returns `Ok(())` only when stopped. End-of-stream on any source ends
    /// the bridge with `BridgeError::Closed`.
    pub fn run(&self, stop: &CancellationToken) -> Result<(), BridgeError> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let sources: Vec<BorrowedFd<'_>> =
            self.directions.iter().map(|d| d.source.as_fd()).collect();

        while !stop.is_cancelled() {
            let ready = poll_readable(&sources, self.timeout)?;
            for (direction, ready) in self.directions.iter().zip(ready) {
                if !ready {
                    continue;
                }
                let sink = direction.sink.as_fd();
                let mut wait = writable_waiter(sink, self.timeout, stop);
                match transfer(
                    &mut FdIo(direction.source.as_fd()),
                    &mut FdIo(sink),
                    &mut buf,
                    &mut wait,
                ) {
                    Ok(n) => trace!("Bridged {} bytes", n),
                    Err(BridgeError::Cancelled) => {
                        debug!("Bridge stopped with a chunk pending");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
