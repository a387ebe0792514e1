//! Messaging client abstraction and the built-in relay client
//!
//! The transport only needs a handful of operations from a presence and
//! messaging service: log in, announce presence, send a chat message to an
//! identity, and report what happened during one bounded event-loop turn.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::bridge::{is_recoverable, poll_readable};

use super::session::Identity;
use super::wire::{Frame, MessageKind, MAX_LINE_LEN};

/// Bound on establishing the TCP connection to one relay address
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that happened on the carrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Login accepted
    Connected,
    /// The relay closed the connection in an orderly way
    Disconnected,
    Presence {
        from: Identity,
    },
    Message {
        from: Identity,
        kind: MessageKind,
        body: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Io(#[from] io::Error),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,
}

/// Presence/messaging service used by the relay transport
pub trait MessagingClient: Send {
    /// Open the connection and start logging in
    ///
    /// Completion is reported later as `ClientEvent::Connected`.
    fn connect(&mut self, identity: &Identity, password: &str) -> Result<(), ClientError>;

    /// Process carrier input for at most `timeout`
    ///
    /// Returns early, possibly with no events, as soon as `local` becomes
    /// readable, so the caller can forward pending local data.
    fn run_once(
        &mut self,
        timeout: Duration,
        local: Option<BorrowedFd<'_>>,
    ) -> Result<Vec<ClientEvent>, ClientError>;

    fn send_presence(&mut self) -> Result<(), ClientError>;

    fn send_message(&mut self, to: &Identity, body: &str) -> Result<(), ClientError>;

    /// Close the connection; safe to call more than once
    fn disconnect(&mut self);
}

/// JSON-lines relay client over TCP
pub struct TcpRelayClient {
    server: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl TcpRelayClient {
    /// `server` is a `host:port` pair
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            connect_timeout: CONNECT_TIMEOUT,
            stream: None,
            pending: Vec::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Try every resolved address in turn, each bounded by the connect timeout
    fn open_stream(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.server.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Relay address {} unreachable: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", self.server),
            )
        }))
    }

    /// Serialized login frame; the buffer is wiped when dropped
    fn auth_line(identity: &Identity, password: &str) -> Result<Zeroizing<Vec<u8>>, ClientError> {
        let mut frame = Frame::Auth {
            identity: identity.to_string(),
            password: password.to_string(),
        };
        let line = frame
            .to_line()
            .map(Zeroizing::new)
            .map_err(|e| ClientError::Protocol(e.to_string()));
        if let Frame::Auth { password, .. } = &mut frame {
            password.zeroize();
        }
        line
    }

    fn send_line(&mut self, line: &[u8]) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        stream.write_all(line)?;
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let line = frame
            .to_line()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.send_line(&line)
    }

    fn parse_line(line: &[u8]) -> Result<Option<ClientEvent>, ClientError> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return Ok(None);
        }
        let event = match Frame::from_line(line) {
            Ok(Frame::AuthOk) => Some(ClientEvent::Connected),
            Ok(Frame::AuthFailed { reason }) => return Err(ClientError::Auth(reason)),
            Ok(Frame::Disconnect) => Some(ClientEvent::Disconnected),
            Ok(Frame::Presence { from: Some(from) }) => Some(ClientEvent::Presence {
                from: Identity::new(from),
            }),
            Ok(Frame::Message {
                from: Some(from),
                kind,
                body,
                ..
            }) => Some(ClientEvent::Message {
                from: Identity::new(from),
                kind,
                body,
            }),
            Ok(_) => {
                debug!("Ignoring unexpected relay frame");
                None
            }
            Err(e) => {
                debug!("Skipping malformed relay line: {}", e);
                None
            }
        };
        Ok(event)
    }
}

impl MessagingClient for TcpRelayClient {
    fn connect(&mut self, identity: &Identity, password: &str) -> Result<(), ClientError> {
        let stream = self.open_stream()?;
        stream.set_nodelay(true)?;
        info!("Connected to relay {}", self.server);
        self.stream = Some(stream);
        self.pending.clear();

        let line = Self::auth_line(identity, password)?;
        self.send_line(&line)
    }

    fn run_once(
        &mut self,
        timeout: Duration,
        local: Option<BorrowedFd<'_>>,
    ) -> Result<Vec<ClientEvent>, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        let mut events = Vec::new();
        let mut fds = vec![stream.as_fd()];
        fds.extend(local);
        if !poll_readable(&fds, timeout)?[0] {
            return Ok(events);
        }

        let mut chunk = [0u8; 4096];
        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if is_recoverable(&e) => return Ok(events),
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            info!("Relay {} closed the connection", self.server);
            self.stream = None;
            events.push(ClientEvent::Disconnected);
            return Ok(events);
        }

        self.pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = Self::parse_line(&line[..pos])? {
                events.push(event);
            }
        }
        if self.pending.len() > MAX_LINE_LEN {
            return Err(ClientError::Protocol(format!(
                "relay line exceeds {} bytes",
                MAX_LINE_LEN
            )));
        }
        Ok(events)
    }

    fn send_presence(&mut self) -> Result<(), ClientError> {
        self.send_frame(&Frame::Presence { from: None })
    }

    fn send_message(&mut self, to: &Identity, body: &str) -> Result<(), ClientError> {
        self.send_frame(&Frame::Message {
            from: None,
            to: Some(to.to_string()),
            kind: MessageKind::Chat,
            body: Some(body.to_string()),
        })
    }

    fn disconnect(&mut self) {
        if self.stream.is_none() {
            return;
        }
        if let Err(e) = self.send_frame(&Frame::Disconnect) {
            debug!("Failed to send disconnect: {}", e);
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_events() {
        assert_eq!(
            TcpRelayClient::parse_line(br#"{"type":"auth_ok"}"#).unwrap(),
            Some(ClientEvent::Connected)
        );
        assert_eq!(
            TcpRelayClient::parse_line(br#"{"type":"message","from":"bob@x","kind":"error"}"#)
                .unwrap(),
            Some(ClientEvent::Message {
                from: "bob@x".into(),
                kind: MessageKind::Error,
                body: None,
            })
        );
        assert_eq!(TcpRelayClient::parse_line(b"not json\r").unwrap(), None);
        assert_eq!(TcpRelayClient::parse_line(b"").unwrap(), None);
        assert!(matches!(
            TcpRelayClient::parse_line(br#"{"type":"auth_failed","reason":"bad password"}"#),
            Err(ClientError::Auth(reason)) if reason == "bad password"
        ));
    }

    #[test]
    fn test_requires_connection() {
        let mut client = TcpRelayClient::new("127.0.0.1:1");
        assert!(matches!(
            client.run_once(Duration::from_millis(1), None),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.send_presence(), Err(ClientError::NotConnected)));
        client.disconnect();
    }

    #[test]
    fn test_auth_line_carries_credentials() {
        let line = TcpRelayClient::auth_line(&"alice@x/res".into(), "s3cret").unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(
            Frame::from_line(&line[..line.len() - 1]).unwrap(),
            Frame::Auth {
                identity: "alice@x/res".to_string(),
                password: "s3cret".to_string(),
            }
        );

        let mut line = line;
        line.zeroize();
        assert!(line.is_empty());
    }

    #[test]
    fn test_connect_refused_is_io_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = TcpRelayClient::new(addr.to_string());
        assert!(matches!(
            client.connect(&"alice@x".into(), "pw"),
            Err(ClientError::Io(_))
        ));
    }

    #[test]
    fn test_connect_gives_up_after_timeout() {
        // TEST-NET-1 is never routed; the attempt either times out or fails fast
        let mut client = TcpRelayClient::new("192.0.2.1:5222")
            .with_connect_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(matches!(
            client.connect(&"alice@x".into(), "pw"),
            Err(ClientError::Io(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_run_once_wakes_on_local_input() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpRelayClient::new(listener.local_addr().unwrap().to_string());
        client.connect(&"alice@x".into(), "pw").unwrap();
        let (_relay, _) = listener.accept().unwrap();

        let (read, write) = crate::bridge::pipe().unwrap();
        crate::bridge::FdIo(&write).write_all(b"x").unwrap();
        let started = std::time::Instant::now();
        let events = client
            .run_once(Duration::from_secs(5), Some(read.as_fd()))
            .unwrap();
        assert!(events.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        client.disconnect();
    }
}
