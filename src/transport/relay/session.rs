//! Peer session: who we talk to and whether we trust them
//!
//! Message-oriented carriers have no fixed remote endpoint. The session
//! either starts from a configured peer, which is trusted after its first
//! message, or adopts the first sender it hears from. Once trusted, the
//! peer never changes for the lifetime of the session.

use std::fmt;

use thiserror::Error;
use tracing::info;

use crate::codec::{self, CodecError};
use crate::module::Role;
use crate::utils::fatal;

use super::wire::MessageKind;

/// Control payload that ends the session when received
pub const TERMINATE_PAYLOAD: &str = "terminate";

/// Carrier address of the form `node@domain/resource`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Self {
        Identity(raw.into())
    }

    /// Full identity, used for addressing
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity without the resource part
    pub fn bare(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// Lowercased bare identity, used for trust comparisons
    pub fn canonical(&self) -> String {
        self.bare().to_lowercase()
    }

    pub fn domain(&self) -> Option<&str> {
        self.bare()
            .split_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }

    /// Whether both identities name the same account
    pub fn same_peer(&self, other: &Identity) -> bool {
        self.canonical() == other.canonical()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Self {
        Identity::new(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    Untrusted,
    Trusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid connection transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Why an inbound message was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotConnected,
    ErrorMessage,
    EmptyBody,
    UntrustedSender { peer: Identity },
    MalformedBody(CodecError),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotConnected => write!(f, "session not connected"),
            RejectReason::ErrorMessage => write!(f, "error message"),
            RejectReason::EmptyBody => write!(f, "no body"),
            RejectReason::UntrustedSender { peer } => write!(f, "sender is not {}", peer),
            RejectReason::MalformedBody(e) => write!(f, "malformed body: {}", e),
        }
    }
}

/// Outcome of one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Decoded payload for the local interface
    Deliver(Vec<u8>),
    /// The remote side ended the session
    Terminate,
    Rejected(RejectReason),
}

#[derive(Debug)]
pub struct PeerSession {
    role: Role,
    local: Identity,
    configured_peer: Option<Identity>,
    peer: Option<Identity>,
    trust: TrustState,
    state: ConnectionState,
    accept_remote_terminate: bool,
}

impl PeerSession {
    pub fn new(role: Role, local: Identity, configured_peer: Option<Identity>) -> Self {
        Self {
            role,
            local,
            configured_peer,
            peer: None,
            trust: TrustState::Untrusted,
            state: ConnectionState::Disconnected,
            accept_remote_terminate: true,
        }
    }

    /// Whether a `terminate` body from any sender ends the session
    pub fn with_remote_terminate(mut self, accept: bool) -> Self {
        self.accept_remote_terminate = accept;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn trust(&self) -> TrustState {
        self.trust
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Where outbound payloads go: the trusted peer, else the configured one
    pub fn outbound_target(&self) -> Option<&Identity> {
        self.peer.as_ref().or(self.configured_peer.as_ref())
    }

    fn transition(
        &mut self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting)
    }

    pub fn connected(&mut self) -> Result<(), SessionError> {
        self.transition(ConnectionState::Connecting, ConnectionState::Connected)
    }

    /// Terminal; allowed from any state
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn trust_sender(&mut self, from: &Identity) -> Result<(), RejectReason> {
        match (self.trust, &self.configured_peer) {
            (TrustState::Trusted, _) => match &self.peer {
                Some(peer) if peer.same_peer(from) => Ok(()),
                Some(peer) => Err(RejectReason::UntrustedSender { peer: peer.clone() }),
                None => fatal("trusted session without a peer"),
            },
            (TrustState::Untrusted, Some(configured)) if !configured.same_peer(from) => {
                Err(RejectReason::UntrustedSender {
                    peer: configured.clone(),
                })
            }
            (TrustState::Untrusted, configured) => {
                if configured.is_none() {
                    info!("Discovered peer {}", from);
                } else {
                    info!("Peer {} confirmed", from);
                }
                self.peer = Some(from.clone());
                self.trust = TrustState::Trusted;
                Ok(())
            }
        }
    }

    /// Classify one inbound message and update trust accordingly
    pub fn handle_message(
        &mut self,
        from: &Identity,
        kind: MessageKind,
        body: Option<&str>,
    ) -> Inbound {
        if !self.is_connected() {
            return Inbound::Rejected(RejectReason::NotConnected);
        }
        if kind == MessageKind::Error {
            return Inbound::Rejected(RejectReason::ErrorMessage);
        }
        let Some(body) = body.filter(|b| !b.is_empty()) else {
            return Inbound::Rejected(RejectReason::EmptyBody);
        };
        if self.accept_remote_terminate && body == TERMINATE_PAYLOAD {
            info!("{} ended the session", from);
            self.close();
            return Inbound::Terminate;
        }
        if let Err(reason) = self.trust_sender(from) {
            return Inbound::Rejected(reason);
        }
        match codec::decode(body) {
            Ok(payload) => Inbound::Deliver(payload),
            Err(e) => Inbound::Rejected(RejectReason::MalformedBody(e)),
        }
    }
}
