//! Interface modules: the local end of the tunnel
//!
//! - `ppp`: pppd child process on the channel ends
//! - `tun` / `tap`: kernel virtual network device
//! - `stdio`: host stdin/stdout

pub mod pppd;
pub mod stdio;
pub mod tun;
pub mod worker;

pub use pppd::PppdInterface;
pub use stdio::StdioInterface;
pub use tun::{DeviceMode, TunInterface};
pub use worker::BridgeWorker;
