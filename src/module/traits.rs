//! Module lifecycle traits and the context handed to every module
//!
//! An interface module produces and consumes the raw link-layer stream on
//! the local host; a transport module moves opaque payloads to and from one
//! remote peer. The tunnel owns one of each and drives them through
//! `init -> run -> (stop) -> fini`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeError;

/// Which side of the link this host plays
///
/// The initiator is started with `--server` and usually owns the well-known
/// addresses; the responder is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    #[default]
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Kind of pluggable module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Interface,
    Transport,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Interface => write!(f, "interface"),
            ModuleKind::Transport => write!(f, "transport"),
        }
    }
}

/// Context provided to modules at initialization
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    /// Role of this host
    pub role: Role,
    /// Module options (`key=value` arguments and the `[options]` table)
    pub options: HashMap<String, String>,
}

impl ModuleContext {
    pub fn new(role: Role, options: HashMap<String, String>) -> Self {
        Self { role, options }
    }

    /// Get an option value
    pub fn get_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    /// Get an option value with default
    pub fn get_option_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_option(key).unwrap_or(default)
    }

    /// Interpret an option as a boolean; `"true"` and `"1"` are true
    pub fn get_flag(&self, key: &str) -> Option<bool> {
        self.get_option(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    /// Get a mandatory option
    pub fn require(&self, key: &str) -> Result<&str, ModuleError> {
        self.get_option(key)
            .ok_or_else(|| ModuleError::Config(format!("missing option '{}'", key)))
    }

    /// Parse an option into `T`; absent options yield `None`
    pub fn parse_option<T>(&self, key: &str) -> Result<Option<T>, ModuleError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get_option(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    ModuleError::Config(format!("invalid value '{}' for '{}': {}", raw, key, e))
                })
            })
            .transpose()
    }
}

/// Module errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Carrier error: {0}")]
    Carrier(String),

    #[error("Lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel ends handed to an interface module
///
/// `read` yields bytes that arrived from the transport; bytes written to
/// `write` go to the transport.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceEnds<'a> {
    pub read: BorrowedFd<'a>,
    pub write: BorrowedFd<'a>,
}

/// Channel ends handed to a transport module
///
/// `read` yields bytes to send to the peer; bytes received from the peer
/// are written to `write`.
#[derive(Debug, Clone, Copy)]
pub struct TransportEnds<'a> {
    pub read: BorrowedFd<'a>,
    pub write: BorrowedFd<'a>,
}

/// Local link-layer endpoint
///
/// The ends passed to `run` are only borrowed for the duration of the
/// call; an implementation that keeps using them must duplicate them.
pub trait InterfaceModule: Send {
    /// Start moving bytes; returns once the work is running in the background
    fn run(&mut self, ends: InterfaceEnds<'_>) -> Result<(), ModuleError>;

    /// Stop background work; no channel I/O happens after this returns.
    /// Calling it when nothing runs is a no-op.
    fn stop(&mut self) -> Result<(), ModuleError>;

    /// Release everything acquired in `init`
    fn fini(self: Box<Self>) {}
}

/// Carrier to the remote peer
pub trait TransportModule: Send {
    /// Main loop; blocks until `shutdown` is cancelled, the carrier closes,
    /// or a fatal error occurs
    fn run(
        &mut self,
        ends: TransportEnds<'_>,
        shutdown: &CancellationToken,
    ) -> Result<(), ModuleError>;

    /// Release everything acquired in `init`
    fn fini(self: Box<Self>) {}
}
