//! Relay transport scenarios
//!
//! A scripted client drives the transport through discovery, trust and
//! termination; a small in-test relay checks the built-in TCP client end
//! to end.

mod common;

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::os::fd::BorrowedFd;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use pppoat::codec;
use pppoat::module::{ModuleError, Role, TransportEnds, TransportModule};
use pppoat::transport::relay::{
    self, ClientError, ClientEvent, ConnectionState, Identity, MessageKind, MessagingClient,
    PeerSession, RelayTransport, TrustState, TERMINATE_PAYLOAD,
};

use common::*;

#[derive(Default)]
struct Record {
    logins: Vec<(String, String)>,
    presences: usize,
    sent: Vec<(String, String)>,
    turns: usize,
    disconnects: usize,
}

/// Replays one batch of events per `run_once`; reports an orderly
/// disconnect once the script is exhausted
struct ScriptedClient {
    script: VecDeque<Result<Vec<ClientEvent>, ClientError>>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedClient {
    fn new(
        script: Vec<Result<Vec<ClientEvent>, ClientError>>,
    ) -> (Box<dyn MessagingClient>, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let client = ScriptedClient {
            script: script.into(),
            record: record.clone(),
        };
        (Box::new(client), record)
    }
}

impl MessagingClient for ScriptedClient {
    fn connect(&mut self, identity: &Identity, password: &str) -> Result<(), ClientError> {
        self.record
            .lock()
            .unwrap()
            .logins
            .push((identity.to_string(), password.to_string()));
        Ok(())
    }

    fn run_once(
        &mut self,
        _timeout: Duration,
        _local: Option<BorrowedFd<'_>>,
    ) -> Result<Vec<ClientEvent>, ClientError> {
        self.record.lock().unwrap().turns += 1;
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(vec![ClientEvent::Disconnected]))
    }

    fn send_presence(&mut self) -> Result<(), ClientError> {
        self.record.lock().unwrap().presences += 1;
        Ok(())
    }

    fn send_message(&mut self, to: &Identity, body: &str) -> Result<(), ClientError> {
        self.record
            .lock()
            .unwrap()
            .sent
            .push((to.to_string(), body.to_string()));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.record.lock().unwrap().disconnects += 1;
    }
}

fn chat(from: &str, body: &str) -> ClientEvent {
    ClientEvent::Message {
        from: Identity::new(from),
        kind: MessageKind::Chat,
        body: Some(body.to_string()),
    }
}

fn transport(client: Box<dyn MessagingClient>, peer: Option<&str>) -> RelayTransport {
    let session = PeerSession::new(
        Role::Responder,
        Identity::new("alice@example.org/tunnel"),
        peer.map(Identity::new),
    );
    RelayTransport::new(client, session, Zeroizing::new("secret".to_string()))
        .with_timeout(Duration::from_millis(10))
}

/// Channel pipes for one run: (to_transport, to_interface)
struct Channels {
    outbound_read: std::os::fd::OwnedFd,
    outbound_write: std::os::fd::OwnedFd,
    inbound_read: std::os::fd::OwnedFd,
    inbound_write: std::os::fd::OwnedFd,
}

impl Channels {
    fn new() -> Self {
        let (outbound_read, outbound_write) = test_pipe();
        let (inbound_read, inbound_write) = test_pipe();
        Self {
            outbound_read,
            outbound_write,
            inbound_read,
            inbound_write,
        }
    }

    fn run(&self, transport: &mut RelayTransport, shutdown: &CancellationToken) -> Result<(), ModuleError> {
        use std::os::fd::AsFd;
        transport.run(
            TransportEnds {
                read: self.outbound_read.as_fd(),
                write: self.inbound_write.as_fd(),
            },
            shutdown,
        )
    }
}

#[test]
fn test_remote_terminate_ends_run() {
    let (client, record) = ScriptedClient::new(vec![
        Ok(vec![ClientEvent::Connected]),
        Ok(vec![chat("stranger@elsewhere/x", TERMINATE_PAYLOAD)]),
        Ok(vec![chat("bob@example.org", &codec::encode(b"late"))]),
    ]);
    let mut relay = transport(client, Some("bob@example.org"));
    let channels = Channels::new();

    channels.run(&mut relay, &CancellationToken::new()).unwrap();

    assert_eq!(relay.session().state(), ConnectionState::Closed);
    let record = record.lock().unwrap();
    assert_eq!(record.turns, 2, "run continued after terminate");
    assert_eq!(record.logins, [("alice@example.org/tunnel".to_string(), "secret".to_string())]);
    assert_eq!(record.presences, 1);
    assert_eq!(record.disconnects, 1);
    assert!(read_available(&channels.inbound_read).is_empty());
}

#[test]
fn test_discovery_happens_once() {
    let (client, _record) = ScriptedClient::new(vec![
        Ok(vec![ClientEvent::Connected]),
        Ok(vec![
            chat("Bob@Example.org/phone", &codec::encode(b"one ")),
            chat("eve@example.org", &codec::encode(b"evil ")),
            ClientEvent::Message {
                from: Identity::new("bob@example.org"),
                kind: MessageKind::Error,
                body: Some(codec::encode(b"error ")),
            },
            chat("bob@example.org/laptop", "%%%%"),
            chat("bob@example.org/laptop", &codec::encode(b"two")),
        ]),
    ]);
    let mut relay = transport(client, None);
    let channels = Channels::new();

    channels.run(&mut relay, &CancellationToken::new()).unwrap();

    assert_eq!(read_available(&channels.inbound_read), b"one two");
    assert_eq!(relay.session().trust(), TrustState::Trusted);
    assert_eq!(
        relay.session().outbound_target().map(Identity::as_str),
        Some("Bob@Example.org/phone")
    );
}

#[test]
fn test_outbound_goes_to_configured_peer() {
    let (client, record) = ScriptedClient::new(vec![Ok(vec![ClientEvent::Connected])]);
    let mut relay = transport(client, Some("bob@example.org"));
    let channels = Channels::new();
    write_fd(&channels.outbound_write, b"hello");

    channels.run(&mut relay, &CancellationToken::new()).unwrap();

    let record = record.lock().unwrap();
    assert_eq!(
        record.sent,
        [("bob@example.org".to_string(), "aGVsbG8=".to_string())]
    );
}

#[test]
fn test_outbound_without_peer_is_dropped() {
    let (client, record) = ScriptedClient::new(vec![Ok(vec![ClientEvent::Connected])]);
    let mut relay = transport(client, None);
    let channels = Channels::new();
    write_fd(&channels.outbound_write, b"lost");

    channels.run(&mut relay, &CancellationToken::new()).unwrap();

    assert!(record.lock().unwrap().sent.is_empty());
    // The chunk was consumed, not left behind
    assert!(read_available(&channels.outbound_read).is_empty());
}

#[test]
fn test_nothing_forwarded_before_login_completes() {
    let (client, record) = ScriptedClient::new(vec![Ok(vec![]), Ok(vec![])]);
    let mut relay = transport(client, Some("bob@example.org"));
    let channels = Channels::new();
    write_fd(&channels.outbound_write, b"early");

    channels.run(&mut relay, &CancellationToken::new()).unwrap();

    assert!(record.lock().unwrap().sent.is_empty());
    assert_eq!(read_available(&channels.outbound_read), b"early");
}

#[test]
fn test_remote_terminate_can_be_disabled() {
    let (client, record) = ScriptedClient::new(vec![
        Ok(vec![ClientEvent::Connected]),
        Ok(vec![chat("bob@example.org", TERMINATE_PAYLOAD)]),
        Ok(vec![chat("bob@example.org", &codec::encode(b"still here"))]),
    ]);
    let session = PeerSession::new(
        Role::Initiator,
        Identity::new("alice@example.org"),
        Some(Identity::new("bob@example.org")),
    )
    .with_remote_terminate(false);
    let mut relay = RelayTransport::new(client, session, Zeroizing::new(String::new()))
        .with_timeout(Duration::from_millis(10));
    let channels = Channels::new();

    channels.run(&mut relay, &CancellationToken::new()).unwrap();

    assert_eq!(read_available(&channels.inbound_read), b"still here");
    assert_eq!(record.lock().unwrap().turns, 4);
}

#[test]
fn test_carrier_failure_is_an_error() {
    let (client, record) = ScriptedClient::new(vec![
        Ok(vec![ClientEvent::Connected]),
        Err(ClientError::Io(std::io::ErrorKind::ConnectionReset.into())),
    ]);
    let mut relay = transport(client, None);
    let channels = Channels::new();

    let err = channels.run(&mut relay, &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, ModuleError::Carrier(_)));
    assert_eq!(relay.session().state(), ConnectionState::Closed);
    assert_eq!(record.lock().unwrap().disconnects, 1);
}

#[test]
fn test_local_end_of_stream_is_fatal_once_connected() {
    let (client, _record) = ScriptedClient::new(vec![Ok(vec![ClientEvent::Connected])]);
    let mut relay = transport(client, Some("bob@example.org"));
    let Channels {
        outbound_read,
        outbound_write,
        inbound_read: _inbound_read,
        inbound_write,
    } = Channels::new();
    drop(outbound_write);

    use std::os::fd::AsFd;
    let err = relay
        .run(
            TransportEnds {
                read: outbound_read.as_fd(),
                write: inbound_write.as_fd(),
            },
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, ModuleError::Bridge(pppoat::bridge::BridgeError::Closed)));
}

#[test]
fn test_shutdown_token_stops_loop() {
    let (client, record) = ScriptedClient::new(vec![Ok(vec![ClientEvent::Connected])]);
    let mut relay = transport(client, None);
    let channels = Channels::new();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    channels.run(&mut relay, &shutdown).unwrap();
    assert_eq!(record.lock().unwrap().turns, 0);
}

#[test]
fn test_tcp_relay_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server_addr = listener.local_addr().unwrap();

    // Relay: accept, authenticate, deliver "ping", wait for "pong", terminate
    let relay_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(TEST_TIMEOUT)).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        let next_line = |reader: &mut BufReader<std::net::TcpStream>| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            serde_json::from_str::<serde_json::Value>(&line).unwrap_or(serde_json::Value::Null)
        };

        lines.push(next_line(&mut reader));
        writeln!(writer, r#"{{"type":"auth_ok"}}"#).unwrap();
        lines.push(next_line(&mut reader));
        writeln!(writer, "not json at all").unwrap();
        writeln!(
            writer,
            r#"{{"type":"message","from":"bob@example.org/relay","kind":"chat","body":"{}"}}"#,
            codec::encode(b"ping")
        )
        .unwrap();
        lines.push(next_line(&mut reader));
        writeln!(
            writer,
            r#"{{"type":"message","from":"bob@example.org","body":"{}"}}"#,
            TERMINATE_PAYLOAD
        )
        .unwrap();
        lines.push(next_line(&mut reader));
        lines
    });

    let server = server_addr.to_string();
    let ctx = context(
        Role::Responder,
        &[
            ("identity", "alice@example.org/tunnel"),
            ("password", "secret"),
            ("server", server.as_str()),
        ],
    );
    let mut module = (relay::DESCRIPTOR.init)(&ctx).unwrap();
    let channels = Channels::new();
    let Channels {
        outbound_read,
        outbound_write,
        inbound_read,
        inbound_write,
    } = channels;

    let transport_thread = thread::spawn(move || {
        use std::os::fd::AsFd;
        let result = module.run(
            TransportEnds {
                read: outbound_read.as_fd(),
                write: inbound_write.as_fd(),
            },
            &CancellationToken::new(),
        );
        module.fini();
        result
    });

    assert_eq!(read_exact_timeout(&inbound_read, 4), b"ping");
    write_fd(&outbound_write, b"pong");

    transport_thread.join().unwrap().unwrap();
    let lines = relay_thread.join().unwrap();

    assert_eq!(lines[0]["type"], "auth");
    assert_eq!(lines[0]["identity"], "alice@example.org/tunnel");
    assert_eq!(lines[0]["password"], "secret");
    assert_eq!(lines[1]["type"], "presence");
    assert_eq!(lines[2]["type"], "message");
    assert_eq!(lines[2]["to"], "bob@example.org/relay");
    assert_eq!(lines[2]["body"], codec::encode(b"pong"));
    assert_eq!(lines[3]["type"], "disconnect");
}

#[test]
fn test_queued_chunks_leave_without_waiting_for_the_relay() {
    const CHUNKS: usize = 4;
    let total = CHUNKS * pppoat::bridge::CHUNK_SIZE;
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server = listener.local_addr().unwrap().to_string();
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    // Relay: log in, then stay silent while collecting chat bodies
    let relay_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(TEST_TIMEOUT)).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut next_line = || {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            serde_json::from_str::<serde_json::Value>(&line).unwrap()
        };

        assert_eq!(next_line()["type"], "auth");
        writeln!(writer, r#"{{"type":"auth_ok"}}"#).unwrap();
        assert_eq!(next_line()["type"], "presence");
        ready_tx.send(()).unwrap();

        let mut received = Vec::new();
        let mut messages = 0;
        while received.len() < total {
            let line = next_line();
            assert_eq!(line["type"], "message");
            assert_eq!(line["to"], "bob@example.org");
            received.extend(codec::decode(line["body"].as_str().unwrap()).unwrap());
            messages += 1;
        }
        done_tx.send(()).unwrap();

        writeln!(
            writer,
            r#"{{"type":"message","from":"bob@example.org","body":"{}"}}"#,
            TERMINATE_PAYLOAD
        )
        .unwrap();
        assert_eq!(next_line()["type"], "disconnect");
        (received, messages)
    });

    let ctx = context(
        Role::Initiator,
        &[
            ("identity", "alice@example.org/tunnel"),
            ("password", "secret"),
            ("peer", "bob@example.org"),
            ("server", server.as_str()),
        ],
    );
    let mut module = (relay::DESCRIPTOR.init)(&ctx).unwrap();
    let Channels {
        outbound_read,
        outbound_write,
        inbound_read: _inbound_read,
        inbound_write,
    } = Channels::new();

    let transport_thread = thread::spawn(move || {
        use std::os::fd::AsFd;
        let result = module.run(
            TransportEnds {
                read: outbound_read.as_fd(),
                write: inbound_write.as_fd(),
            },
            &CancellationToken::new(),
        );
        module.fini();
        result
    });

    ready_rx.recv_timeout(TEST_TIMEOUT).unwrap();
    let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
    let started = Instant::now();
    write_fd(&outbound_write, &payload);
    done_rx.recv_timeout(TEST_TIMEOUT).unwrap();
    let elapsed = started.elapsed();

    transport_thread.join().unwrap().unwrap();
    let (received, messages) = relay_thread.join().unwrap();
    assert_eq!(received, payload);
    assert!(messages >= CHUNKS);
    assert!(
        elapsed < relay::EVENT_TIMEOUT / 2,
        "outbound data took {:?}",
        elapsed
    );
}

#[test]
fn test_relay_server_defaults_to_identity_domain() {
    // Nothing listens on the loopback relay port, so login fails there
    let ctx = context(
        Role::Responder,
        &[("identity", "alice@127.0.0.1"), ("password", "secret")],
    );
    let mut module = (relay::DESCRIPTOR.init)(&ctx).unwrap();
    let channels = Channels::new();
    use std::os::fd::AsFd;
    let err = module
        .run(
            TransportEnds {
                read: channels.outbound_read.as_fd(),
                write: channels.inbound_write.as_fd(),
            },
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, ModuleError::Carrier(msg) if msg.contains("alice@127.0.0.1")));
}

#[test]
fn test_relay_requires_domain_or_server() {
    let ctx = context(Role::Responder, &[("identity", "alice"), ("password", "secret")]);
    let err = (relay::DESCRIPTOR.init)(&ctx).err().unwrap();
    assert!(matches!(err, ModuleError::Config(_)));
}
