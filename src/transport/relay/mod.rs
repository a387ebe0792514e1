//! Relay transport: payloads as chat messages through a presence service
//!
//! Outbound chunks are base64-encoded into chat message bodies addressed to
//! the current peer. Inbound messages pass through the [`PeerSession`],
//! which decides whom to trust and decodes what may be delivered.

pub mod client;
pub mod session;
pub mod wire;

use std::io::Read;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::bridge::{
    is_recoverable, poll_readable, set_nonblocking, write_all, writable_waiter, BridgeError,
    FdIo, CHUNK_SIZE,
};
use crate::codec;
use crate::module::{
    ModuleContext, ModuleError, TransportDescriptor, TransportEnds, TransportModule,
};

pub use client::{ClientError, ClientEvent, MessagingClient, TcpRelayClient};
pub use session::{
    ConnectionState, Identity, Inbound, PeerSession, RejectReason, SessionError, TrustState,
    TERMINATE_PAYLOAD,
};
pub use wire::MessageKind;

pub const DESCRIPTOR: TransportDescriptor = TransportDescriptor {
    name: "relay",
    description: "PPP over a presence/messaging relay",
    required_options: &["identity", "password"],
    init,
};

/// Relay port used when only the identity's domain is known
pub const DEFAULT_RELAY_PORT: u16 = 5222;

/// Bound on one client event-loop turn
pub const EVENT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Local chunks forwarded per turn before the carrier is serviced again
const MAX_CHUNKS_PER_TURN: usize = 16;

fn init(ctx: &ModuleContext) -> Result<Box<dyn TransportModule>, ModuleError> {
    let identity = Identity::new(ctx.require("identity")?);
    let password = Zeroizing::new(ctx.require("password")?.to_string());
    let peer = ctx.get_option("peer").map(Identity::new);
    let server = match ctx.get_option("server") {
        Some(server) => server.to_string(),
        None => identity
            .domain()
            .map(|domain| format!("{}:{}", domain, DEFAULT_RELAY_PORT))
            .ok_or_else(|| {
                ModuleError::Config(format!(
                    "cannot derive a relay server from identity '{}'",
                    identity
                ))
            })?,
    };
    let accept_terminate = ctx.get_flag("accept_remote_terminate").unwrap_or(true);

    let session = PeerSession::new(ctx.role, identity, peer).with_remote_terminate(accept_terminate);
    Ok(Box::new(RelayTransport::new(
        Box::new(TcpRelayClient::new(server)),
        session,
        password,
    )))
}

enum Flow {
    Continue,
    Stop,
}

pub struct RelayTransport {
    client: Box<dyn MessagingClient>,
    session: PeerSession,
    password: Zeroizing<String>,
    timeout: Duration,
}

impl RelayTransport {
    pub fn new(
        client: Box<dyn MessagingClient>,
        session: PeerSession,
        password: Zeroizing<String>,
    ) -> Self {
        Self {
            client,
            session,
            password,
            timeout: EVENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    fn handle_event(
        &mut self,
        event: ClientEvent,
        write: BorrowedFd<'_>,
        shutdown: &CancellationToken,
    ) -> Result<Flow, ModuleError> {
        match event {
            ClientEvent::Connected => {
                self.session
                    .connected()
                    .map_err(|e| ModuleError::Lifecycle(e.to_string()))?;
                self.client
                    .send_presence()
                    .map_err(|e| ModuleError::Carrier(e.to_string()))?;
                info!("Logged in as {}", self.session.local());
            }
            ClientEvent::Disconnected => {
                info!("Relay connection closed");
                return Ok(Flow::Stop);
            }
            ClientEvent::Presence { from } => debug!("Presence from {}", from),
            ClientEvent::Message { from, kind, body } => {
                match self.session.handle_message(&from, kind, body.as_deref()) {
                    Inbound::Deliver(payload) => {
                        trace!("Delivering {} bytes from {}", payload.len(), from);
                        let mut wait = writable_waiter(write, self.timeout, shutdown);
                        match write_all(&mut FdIo(write), &payload, &mut wait) {
                            Ok(()) => {}
                            Err(BridgeError::Cancelled) => return Ok(Flow::Stop),
                            Err(e) => return Err(e.into()),
                        }
                    }
                    Inbound::Terminate => return Ok(Flow::Stop),
                    Inbound::Rejected(reason) => {
                        debug!("Dropping message from {}: {}", from, reason)
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Send the chunks already waiting on the channel
    fn forward_local(&mut self, read: BorrowedFd<'_>, buf: &mut [u8]) -> Result<(), ModuleError> {
        for _ in 0..MAX_CHUNKS_PER_TURN {
            if !poll_readable(&[read], Duration::ZERO)?[0] {
                return Ok(());
            }
            let n = match FdIo(read).read(buf) {
                Ok(0) => return Err(BridgeError::Closed.into()),
                Ok(n) => n,
                Err(e) if is_recoverable(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let Some(peer) = self.session.outbound_target().cloned() else {
                debug!("No peer known yet, dropping {} bytes", n);
                continue;
            };
            self.client
                .send_message(&peer, &codec::encode(&buf[..n]))
                .map_err(|e| ModuleError::Carrier(e.to_string()))?;
        }
        Ok(())
    }

    fn serve(
        &mut self,
        ends: TransportEnds<'_>,
        shutdown: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if shutdown.is_cancelled() {
                info!("Relay transport shutting down");
                return Ok(());
            }
            let local = self.session.is_connected().then_some(ends.read);
            let events = self
                .client
                .run_once(self.timeout, local)
                .map_err(|e| ModuleError::Carrier(e.to_string()))?;
            for event in events {
                if let Flow::Stop = self.handle_event(event, ends.write, shutdown)? {
                    return Ok(());
                }
            }
            if self.session.is_connected() {
                self.forward_local(ends.read, &mut buf)?;
            }
        }
    }
}

impl TransportModule for RelayTransport {
    fn run(
        &mut self,
        ends: TransportEnds<'_>,
        shutdown: &CancellationToken,
    ) -> Result<(), ModuleError> {
        set_nonblocking(ends.read)?;
        set_nonblocking(ends.write)?;
        self.session
            .begin_connect()
            .map_err(|e| ModuleError::Lifecycle(e.to_string()))?;

        let local = self.session.local().clone();
        info!("Logging in as {} ({})", local, self.session.role());
        let result = match self.client.connect(&local, &self.password) {
            Ok(()) => self.serve(ends, shutdown),
            Err(e) => Err(ModuleError::Carrier(format!("cannot log in as {}: {}", local, e))),
        };
        if let Err(e) = &result {
            warn!("Relay transport failed: {}", e);
        }
        self.session.close();
        self.client.disconnect();
        result
    }

    fn fini(mut self: Box<Self>) {
        self.client.disconnect();
    }
}
