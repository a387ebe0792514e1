//! Datagram transport
//!
//! Every chunk read from the channel becomes one datagram to the fixed
//! remote address; every datagram received is written to the channel as
//! is. There is no framing, reassembly or acknowledgement.

use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::bridge::{
    is_recoverable, poll_readable, set_nonblocking, wait_writable, write_all, writable_waiter,
    BridgeError, FdIo, CHUNK_SIZE, DEFAULT_POLL_TIMEOUT,
};
use crate::module::{
    ModuleContext, ModuleError, Role, TransportDescriptor, TransportEnds, TransportModule,
};

pub const DESCRIPTOR: TransportDescriptor = TransportDescriptor {
    name: "udp",
    description: "PPP over UDP",
    required_options: &[],
    init,
};

pub const UDP_PORT_INITIATOR: u16 = 0xc001;
pub const UDP_PORT_RESPONDER: u16 = 0xc001;
/// Default remote host of the responder (the initiator's address)
pub const UDP_HOST_INITIATOR: &str = "192.168.4.1";
/// Default remote host of the initiator (the responder's address)
pub const UDP_HOST_RESPONDER: &str = "192.168.4.10";

/// Local and remote addressing of one datagram session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpAddressing {
    pub local_host: Option<String>,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl UdpAddressing {
    /// Defaults for `role`
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Initiator => Self {
                local_host: None,
                local_port: UDP_PORT_INITIATOR,
                remote_host: UDP_HOST_RESPONDER.to_string(),
                remote_port: UDP_PORT_RESPONDER,
            },
            Role::Responder => Self {
                local_host: None,
                local_port: UDP_PORT_RESPONDER,
                remote_host: UDP_HOST_INITIATOR.to_string(),
                remote_port: UDP_PORT_INITIATOR,
            },
        }
    }

    /// Role defaults overridden by `local_host`, `local_port`,
    /// `remote_host` and `remote_port` options
    pub fn from_context(ctx: &ModuleContext) -> Result<Self, ModuleError> {
        let mut addressing = Self::for_role(ctx.role);
        if let Some(host) = ctx.get_option("local_host") {
            addressing.local_host = Some(host.to_string());
        }
        if let Some(port) = ctx.parse_option::<u16>("local_port")? {
            addressing.local_port = port;
        }
        if let Some(host) = ctx.get_option("remote_host") {
            addressing.remote_host = host.to_string();
        }
        if let Some(port) = ctx.parse_option::<u16>("remote_port")? {
            addressing.remote_port = port;
        }
        Ok(addressing)
    }

    fn resolve_remote(&self) -> Result<SocketAddr, ModuleError> {
        (self.remote_host.as_str(), self.remote_port)
            .to_socket_addrs()
            .map_err(|e| {
                ModuleError::Resource(format!("cannot resolve {}: {}", self.remote_host, e))
            })?
            .next()
            .ok_or_else(|| {
                ModuleError::Resource(format!("no address found for {}", self.remote_host))
            })
    }

    fn local_addr(&self, remote: &SocketAddr) -> Result<SocketAddr, ModuleError> {
        let ip = match &self.local_host {
            Some(host) => host.parse::<IpAddr>().map_err(|e| {
                ModuleError::Config(format!("invalid local address '{}': {}", host, e))
            })?,
            None if remote.is_ipv4() => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            None => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Ok(SocketAddr::new(ip, self.local_port))
    }
}

fn init(ctx: &ModuleContext) -> Result<Box<dyn TransportModule>, ModuleError> {
    let addressing = UdpAddressing::from_context(ctx)?;
    Ok(Box::new(UdpTransport::bind(&addressing)?))
}

pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    timeout: Duration,
}

impl UdpTransport {
    /// Resolve the remote and bind the local socket
    pub fn bind(addressing: &UdpAddressing) -> Result<Self, ModuleError> {
        let remote = addressing.resolve_remote()?;
        let local = addressing.local_addr(&remote)?;
        let socket = UdpSocket::bind(local)
            .map_err(|e| ModuleError::Resource(format!("cannot bind {}: {}", local, e)))?;
        socket.set_nonblocking(true)?;
        info!("UDP transport bound to {}, peer {}", local, remote);
        Ok(Self {
            socket,
            remote,
            timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn send_datagram(&self, payload: &[u8], shutdown: &CancellationToken) -> Result<(), ModuleError> {
        loop {
            match self.socket.send_to(payload, self.remote) {
                Ok(sent) if sent == payload.len() => return Ok(()),
                Ok(sent) => {
                    return Err(ModuleError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short datagram send: {} of {} bytes", sent, payload.len()),
                    )))
                }
                Err(e) if is_recoverable(&e) => {
                    if shutdown.is_cancelled() {
                        return Ok(());
                    }
                    wait_writable(self.socket.as_fd(), self.timeout)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Forward one chunk from the channel as a datagram
    fn forward_outbound(
        &self,
        read: BorrowedFd<'_>,
        buf: &mut [u8],
        shutdown: &CancellationToken,
    ) -> Result<(), ModuleError> {
        match FdIo(read).read(buf) {
            Ok(0) => Err(BridgeError::Closed.into()),
            Ok(n) => {
                trace!("Sending {} bytes", n);
                self.send_datagram(&buf[..n], shutdown)
            }
            Err(e) if is_recoverable(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn forward_inbound(
        &self,
        write: BorrowedFd<'_>,
        buf: &mut [u8],
        shutdown: &CancellationToken,
    ) -> Result<(), ModuleError> {
        match self.socket.recv_from(buf) {
            Ok((0, from)) => {
                debug!("Ignoring empty datagram from {}", from);
                Ok(())
            }
            Ok((n, from)) => {
                trace!("Received {} bytes from {}", n, from);
                let mut wait = writable_waiter(write, self.timeout, shutdown);
                match write_all(&mut FdIo(write), &buf[..n], &mut wait) {
                    Ok(()) | Err(BridgeError::Cancelled) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) if is_recoverable(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TransportModule for UdpTransport {
    fn run(
        &mut self,
        ends: TransportEnds<'_>,
        shutdown: &CancellationToken,
    ) -> Result<(), ModuleError> {
        set_nonblocking(ends.read)?;
        set_nonblocking(ends.write)?;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            if shutdown.is_cancelled() {
                info!("UDP transport shutting down");
                return Ok(());
            }
            let ready = poll_readable(&[ends.read, self.socket.as_fd()], self.timeout)?;
            if ready[0] {
                self.forward_outbound(ends.read, &mut buf, shutdown)?;
            }
            if ready[1] {
                self.forward_inbound(ends.write, &mut buf, shutdown)?;
            }
        }
    }
}
