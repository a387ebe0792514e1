//! Byte channels between the interface and the transport

use std::io;
use std::os::fd::OwnedFd;

use crate::bridge::pipe;

/// One unidirectional pipe
#[derive(Debug)]
pub struct ByteChannel {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl ByteChannel {
    pub fn new() -> io::Result<Self> {
        let (read, write) = pipe()?;
        Ok(Self { read, write })
    }
}
