//! pppoat - PPP over Any Transport
//!
//! Tunnels a point-to-point link-layer byte stream (pppd, or frames from a
//! TUN/TAP device) over a pluggable carrier such as a UDP socket or a
//! presence/messaging relay.
//!
//! ## Architecture
//!
//! - **Interface modules** (`interface`) produce and consume the local byte
//!   stream.
//! - **Transport modules** (`transport`) move opaque payloads to and from
//!   one remote peer.
//! - The **tunnel** (`tunnel`) connects one of each through two byte
//!   channels and owns their lifecycle.
//! - The **bridge** (`bridge`) is the non-blocking copy engine shared by
//!   both sides.

// Memory allocator optimization using mimalloc
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod bridge;
pub mod codec;
pub mod config;
pub mod interface;
pub mod module;
pub mod transport;
pub mod tunnel;
pub mod utils;

pub use config::{Cli, FileConfig, LoggingConfig, SessionConfig};
pub use module::{ModuleContext, ModuleError, ModuleRegistry, Role};
pub use tunnel::{Tunnel, TunnelError};
