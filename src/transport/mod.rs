//! Transport modules: the carrier to the remote peer
//!
//! - `udp`: one datagram per chunk to a fixed address
//! - `relay`: base64 chat messages through a presence/messaging relay

pub mod relay;
pub mod udp;

pub use relay::RelayTransport;
pub use udp::{UdpAddressing, UdpTransport};
