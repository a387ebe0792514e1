//! Session orchestration
//!
//! Resolves the requested modules, initializes the transport then the
//! interface, connects them with two byte channels and runs the
//! transport's main loop. Every step that fails undoes the completed ones
//! in reverse order, and a finished run always tears down as
//! stop interface, fini interface, fini transport, close channels.

pub mod channel;

use std::collections::HashMap;
use std::io;
use std::os::fd::AsFd;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::module::{
    InterfaceEnds, ModuleError, ModuleKind, ModuleRegistry, TransportEnds, DEFAULT_INTERFACE,
};

pub use channel::ByteChannel;

/// Tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Unknown {kind} module '{name}'")]
    UnknownModule { kind: ModuleKind, name: String },

    #[error("Module '{module}' requires option '{key}'")]
    MissingOption {
        module: &'static str,
        key: &'static str,
    },

    #[error("Failed to allocate byte channel: {0}")]
    Channel(#[source] io::Error),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl TunnelError {
    /// Whether the error comes from what the user asked for rather than
    /// from the system
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TunnelError::UnknownModule { .. }
                | TunnelError::MissingOption { .. }
                | TunnelError::Module(ModuleError::Config(_))
        )
    }
}

fn check_required(
    module: &'static str,
    required: &'static [&'static str],
    options: &HashMap<String, String>,
) -> Result<(), TunnelError> {
    match required.iter().find(|key| !options.contains_key(**key)) {
        Some(key) => Err(TunnelError::MissingOption { module, key: *key }),
        None => Ok(()),
    }
}

/// Runs one session against a module registry
pub struct Tunnel<'r> {
    registry: &'r ModuleRegistry,
}

impl<'r> Tunnel<'r> {
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Run a session to completion
    ///
    /// Returns when the transport's main loop ends: `shutdown` cancelled,
    /// carrier closed, or a fatal error. Teardown has completed by the time
    /// this returns, whatever the outcome.
    pub fn run(
        &self,
        config: &SessionConfig,
        shutdown: &CancellationToken,
    ) -> Result<(), TunnelError> {
        let interface_name = config.interface.as_deref().unwrap_or(DEFAULT_INTERFACE);
        let interface_desc = self.registry.find_interface(interface_name)?;
        let transport_desc = self.registry.find_transport(&config.transport)?;
        check_required(
            interface_desc.name,
            interface_desc.required_options,
            &config.options,
        )?;
        check_required(
            transport_desc.name,
            transport_desc.required_options,
            &config.options,
        )?;

        let ctx = config.module_context();
        info!(
            "Starting {} over {} as {}",
            interface_desc.name, transport_desc.name, ctx.role
        );

        let mut transport = (transport_desc.init)(&ctx).map_err(|e| {
            error!("Failed to initialize transport {}: {}", transport_desc.name, e);
            e
        })?;

        let mut interface = match (interface_desc.init)(&ctx) {
            Ok(interface) => interface,
            Err(e) => {
                error!("Failed to initialize interface {}: {}", interface_desc.name, e);
                transport.fini();
                return Err(e.into());
            }
        };

        let (to_transport, to_interface) = match ByteChannel::new()
            .and_then(|first| ByteChannel::new().map(|second| (first, second)))
        {
            Ok(channels) => channels,
            Err(e) => {
                interface.fini();
                transport.fini();
                return Err(TunnelError::Channel(e));
            }
        };

        if let Err(e) = interface.run(InterfaceEnds {
            read: to_interface.read.as_fd(),
            write: to_transport.write.as_fd(),
        }) {
            error!("Failed to start interface {}: {}", interface_desc.name, e);
            interface.fini();
            transport.fini();
            return Err(e.into());
        }

        // The interface holds its own copies; closing ours lets end-of-stream
        // reach the transport once the interface side goes away
        let ByteChannel {
            read: transport_read,
            write: interface_write,
        } = to_transport;
        let ByteChannel {
            read: interface_read,
            write: transport_write,
        } = to_interface;
        drop(interface_write);
        drop(interface_read);

        let result = transport.run(
            TransportEnds {
                read: transport_read.as_fd(),
                write: transport_write.as_fd(),
            },
            shutdown,
        );
        match &result {
            Ok(()) => info!("Transport {} finished", transport_desc.name),
            Err(e) => error!("Transport {} failed: {}", transport_desc.name, e),
        }

        if let Err(e) = interface.stop() {
            warn!("Failed to stop interface {}: {}", interface_desc.name, e);
        }
        interface.fini();
        transport.fini();
        drop(transport_read);
        drop(transport_write);

        result.map_err(TunnelError::from)
    }
}
