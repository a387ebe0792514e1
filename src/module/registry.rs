//! Static module tables and name lookup

use std::io::{self, Write};

use crate::interface::{pppd, stdio, tun};
use crate::module::traits::{InterfaceModule, ModuleContext, ModuleError, ModuleKind, TransportModule};
use crate::transport::{relay, udp};
use crate::tunnel::TunnelError;

/// Interface used when none is requested
pub const DEFAULT_INTERFACE: &str = "ppp";

/// Interface constructor
pub type InterfaceInit = fn(&ModuleContext) -> Result<Box<dyn InterfaceModule>, ModuleError>;

/// Transport constructor
pub type TransportInit = fn(&ModuleContext) -> Result<Box<dyn TransportModule>, ModuleError>;

/// Immutable description of an interface module
#[derive(Debug, Clone, Copy)]
pub struct InterfaceDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// Options that must be present before `init` is attempted
    pub required_options: &'static [&'static str],
    pub init: InterfaceInit,
}

/// Immutable description of a transport module
#[derive(Debug, Clone, Copy)]
pub struct TransportDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// Options that must be present before `init` is attempted
    pub required_options: &'static [&'static str],
    pub init: TransportInit,
}

static BUILTIN_INTERFACES: [InterfaceDescriptor; 4] = [
    pppd::DESCRIPTOR,
    tun::TUN_DESCRIPTOR,
    tun::TAP_DESCRIPTOR,
    stdio::DESCRIPTOR,
];

static BUILTIN_TRANSPORTS: [TransportDescriptor; 2] = [udp::DESCRIPTOR, relay::DESCRIPTOR];

static BUILTIN: ModuleRegistry = ModuleRegistry::with_tables(&BUILTIN_INTERFACES, &BUILTIN_TRANSPORTS);

/// Registry of available modules
#[derive(Debug, Clone, Copy)]
pub struct ModuleRegistry {
    interfaces: &'static [InterfaceDescriptor],
    transports: &'static [TransportDescriptor],
}

impl ModuleRegistry {
    /// Modules compiled into this binary
    pub fn builtin() -> &'static ModuleRegistry {
        &BUILTIN
    }

    pub const fn with_tables(
        interfaces: &'static [InterfaceDescriptor],
        transports: &'static [TransportDescriptor],
    ) -> Self {
        Self {
            interfaces,
            transports,
        }
    }

    pub fn interfaces(&self) -> &'static [InterfaceDescriptor] {
        self.interfaces
    }

    pub fn transports(&self) -> &'static [TransportDescriptor] {
        self.transports
    }

    pub fn find_interface(&self, name: &str) -> Result<&'static InterfaceDescriptor, TunnelError> {
        self.interfaces
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| TunnelError::UnknownModule {
                kind: ModuleKind::Interface,
                name: name.to_string(),
            })
    }

    pub fn find_transport(&self, name: &str) -> Result<&'static TransportDescriptor, TunnelError> {
        self.transports
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| TunnelError::UnknownModule {
                kind: ModuleKind::Transport,
                name: name.to_string(),
            })
    }

    /// Print every module with its description
    pub fn write_listing<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Interface modules:")?;
        for d in self.interfaces {
            writeln!(out, "  {:<8} {}", d.name, d.description)?;
        }
        writeln!(out, "Transport modules:")?;
        for d in self.transports {
            writeln!(out, "  {:<8} {}", d.name, d.description)?;
        }
        Ok(())
    }
}
