//! Host stdin/stdout as the link-layer endpoint
//!
//! Useful for piping the tunnel through other tools or for testing. The
//! host endpoints are whatever the caller supplies; by default they are the
//! process stdio, borrowed and never closed.

use std::os::fd::AsFd;
use std::time::Duration;

use tracing::info;

use crate::bridge::{set_nonblocking, Bridge, Endpoint, DEFAULT_POLL_TIMEOUT};
use crate::interface::worker::BridgeWorker;
use crate::module::{
    InterfaceDescriptor, InterfaceEnds, InterfaceModule, ModuleContext, ModuleError,
};
use crate::utils::STOP_TIMEOUT;

pub const DESCRIPTOR: InterfaceDescriptor = InterfaceDescriptor {
    name: "stdio",
    description: "Using stdin/stdout instead of network interface",
    required_options: &[],
    init,
};

fn init(_ctx: &ModuleContext) -> Result<Box<dyn InterfaceModule>, ModuleError> {
    Ok(Box::new(StdioInterface::new(
        Endpoint::stdin(),
        Endpoint::stdout(),
    )))
}

pub struct StdioInterface {
    host: Option<(Endpoint, Endpoint)>,
    timeout: Duration,
    worker: Option<BridgeWorker>,
}

impl StdioInterface {
    /// `input` feeds the tunnel, `output` receives what the peer sent
    pub fn new(input: Endpoint, output: Endpoint) -> Self {
        Self {
            host: Some((input, output)),
            timeout: DEFAULT_POLL_TIMEOUT,
            worker: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl InterfaceModule for StdioInterface {
    fn run(&mut self, ends: InterfaceEnds<'_>) -> Result<(), ModuleError> {
        if self.worker.is_some() {
            return Err(ModuleError::Lifecycle("stdio interface already running".into()));
        }
        let (input, output) = self
            .host
            .take()
            .ok_or_else(|| ModuleError::Lifecycle("stdio interface cannot be restarted".into()))?;

        let from_transport = ends.read.try_clone_to_owned()?;
        let to_transport = ends.write.try_clone_to_owned()?;
        set_nonblocking(from_transport.as_fd())?;
        set_nonblocking(to_transport.as_fd())?;

        let bridge = Bridge::new()
            .with_timeout(self.timeout)
            .direction(input, to_transport)
            .direction(from_transport, output);
        self.worker = Some(BridgeWorker::spawn("stdio", bridge)?);
        info!("Bridging host stdio");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        if let Some(mut worker) = self.worker.take() {
            // End-of-stream from either side is how a stdio session normally ends
            if let Err(e) = worker.stop(STOP_TIMEOUT) {
                info!("stdio bridge ended: {}", e);
            }
        }
        Ok(())
    }
}
