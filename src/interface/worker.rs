//! Background thread running a bridge for thread-backed interfaces

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeError};
use crate::module::ModuleError;
use crate::utils::{fatal, join_within};

/// A bridge running on its own thread with a private stop token
pub struct BridgeWorker {
    name: String,
    stop: CancellationToken,
    handle: Option<JoinHandle<Result<(), BridgeError>>>,
}

impl BridgeWorker {
    /// Start `bridge` on a new thread named after the interface
    pub fn spawn(name: &str, bridge: Bridge) -> Result<Self, ModuleError> {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let label = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("bridge-{}", name))
            .spawn(move || {
                let result = bridge.run(&token);
                match &result {
                    Ok(()) => debug!("{} bridge stopped", label),
                    Err(BridgeError::Closed) => info!("{} bridge reached end of stream", label),
                    Err(e) => warn!("{} bridge failed: {}", label, e),
                }
                // Owned endpoints close here, before the thread reports completion
                drop(bridge);
                result
            })
            .map_err(|e| ModuleError::Resource(format!("failed to spawn bridge thread: {}", e)))?;

        debug!("Started {} bridge worker", name);
        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal the worker and join it within `timeout`
    ///
    /// Returns how the bridge ended. A worker that cannot be joined in time,
    /// or that panicked, is an invariant violation.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.cancel();
        match join_within(handle, timeout) {
            Ok(Ok(result)) => {
                debug!("Joined {} bridge worker", self.name);
                result
            }
            Ok(Err(_)) => fatal(&format!("{} bridge worker panicked", self.name)),
            Err(_) => fatal(&format!(
                "{} bridge worker did not stop within {:?}",
                self.name, timeout
            )),
        }
    }
}

impl Drop for BridgeWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("{} bridge worker dropped without stop", self.name);
            self.stop.cancel();
        }
    }
}
