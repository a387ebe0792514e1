//! Pluggable module contract
//!
//! Interfaces and transports are plain Rust types behind two traits. Each
//! is advertised through a static descriptor (name, description, required
//! options, constructor) collected in a `ModuleRegistry`; there is no
//! dynamic loading.

pub mod registry;
pub mod traits;

pub use registry::{
    InterfaceDescriptor, InterfaceInit, ModuleRegistry, TransportDescriptor, TransportInit,
    DEFAULT_INTERFACE,
};
pub use traits::{
    InterfaceEnds, InterfaceModule, ModuleContext, ModuleError, ModuleKind, Role, TransportEnds,
    TransportModule,
};
