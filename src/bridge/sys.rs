//! Thin descriptor-level syscalls used by the bridge and the transports
//!
//! Everything here works on borrowed descriptors and reports failures as
//! `io::Error` built from `errno`, so callers can classify them by
//! `ErrorKind`.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX)
}

fn poll_fds(pollfds: &mut [PollFd<'_>], timeout: Duration) -> io::Result<()> {
    let timeout = poll_timeout(timeout);
    loop {
        match poll(pollfds, timeout) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn revents(pfd: &PollFd<'_>) -> io::Result<PollFlags> {
    let revents = pfd.revents().unwrap_or_else(PollFlags::empty);
    if revents.contains(PollFlags::POLLNVAL) {
        return Err(Errno::EBADF.into());
    }
    Ok(revents)
}

/// Wait until any of `fds` has input, end-of-stream or an error pending
///
/// Returns one flag per descriptor, in order. All flags are false when the
/// timeout expired. A descriptor that is not open is reported as `EBADF`.
pub fn poll_readable(fds: &[BorrowedFd<'_>], timeout: Duration) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<PollFd<'_>> = fds
        .iter()
        .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();
    poll_fds(&mut pollfds, timeout)?;

    let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    pollfds
        .iter()
        .map(|pfd| revents(pfd).map(|r| r.intersects(ready)))
        .collect()
}

/// Wait until `fd` accepts output; `false` on timeout
pub fn wait_writable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pollfds = [PollFd::new(fd, PollFlags::POLLOUT)];
    poll_fds(&mut pollfds, timeout)?;
    // POLLERR/POLLHUP let the following write report the actual error
    let ready = PollFlags::POLLOUT | PollFlags::POLLERR | PollFlags::POLLHUP;
    Ok(revents(&pollfds[0])?.intersects(ready))
}

/// Put the open file description behind `fd` into non-blocking mode
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    if flags.contains(OFlag::O_NONBLOCK) {
        return Ok(());
    }
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Whether `fd` currently names an open descriptor in this process
pub fn is_open(fd: RawFd) -> bool {
    fcntl(fd, FcntlArg::F_GETFD).is_ok()
}

/// Create a unidirectional pipe, both ends close-on-exec
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    Ok(nix::unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// Create a unidirectional pipe, both ends close-on-exec
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::FdFlag;

    let (read, write) = nix::unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

/// `Read`/`Write` over any descriptor using plain `read(2)`/`write(2)`
///
/// No buffering; a non-blocking descriptor surfaces `WouldBlock` as is.
#[derive(Debug)]
pub struct FdIo<F: AsFd>(pub F);

impl<F: AsFd> Read for FdIo<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(nix::unistd::read(self.0.as_fd().as_raw_fd(), buf)?)
    }
}

impl<F: AsFd> Write for FdIo<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(nix::unistd::write(self.0.as_fd(), buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
