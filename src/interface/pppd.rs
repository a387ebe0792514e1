//! pppd as the link-layer endpoint
//!
//! pppd runs as a child process with the channel ends on its stdin and
//! stdout (`notty`), so no thread of ours touches the stream.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{access, AccessFlags, Pid};
use tracing::{debug, info};

use crate::module::{
    InterfaceDescriptor, InterfaceEnds, InterfaceModule, ModuleContext, ModuleError, Role,
};
use crate::utils::{fatal, wait_within, STOP_TIMEOUT};

pub const DESCRIPTOR: InterfaceDescriptor = InterfaceDescriptor {
    name: "ppp",
    description: "Using pppd",
    required_options: &[],
    init,
};

/// Locations searched for the pppd executable, in order
pub const PPPD_PATHS: [&str; 5] = [
    "/sbin/pppd",
    "/usr/sbin/pppd",
    "/usr/local/sbin/pppd",
    "/usr/bin/pppd",
    "/usr/local/bin/pppd",
];

/// `local:remote` addresses negotiated by the initiator
pub const INITIATOR_ADDRESSES: &str = "10.0.0.1:10.0.0.2";

const PPPD_ARGS: [&str; 4] = ["nodetach", "noauth", "notty", "passive"];

fn is_executable(path: &Path) -> bool {
    match access(path, AccessFlags::X_OK) {
        Ok(()) => true,
        Err(Errno::ENOENT) => false,
        Err(e) => {
            info!("{} exists but is not usable: {}", path.display(), e);
            false
        }
    }
}

/// First executable among `candidates`
pub fn find_pppd<I, P>(candidates: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    candidates.into_iter().find_map(|candidate| {
        let path = candidate.as_ref();
        is_executable(path).then(|| path.to_path_buf())
    })
}

fn init(ctx: &ModuleContext) -> Result<Box<dyn InterfaceModule>, ModuleError> {
    Ok(Box::new(PppdInterface::from_context(ctx)?))
}

pub struct PppdInterface {
    pppd: PathBuf,
    addresses: Option<String>,
    child: Option<Child>,
}

impl PppdInterface {
    pub fn from_context(ctx: &ModuleContext) -> Result<Self, ModuleError> {
        let pppd = match ctx.get_option("pppd") {
            Some(path) => {
                let path = PathBuf::from(path);
                if !is_executable(&path) {
                    return Err(ModuleError::Resource(format!(
                        "{} is not an executable",
                        path.display()
                    )));
                }
                path
            }
            None => find_pppd(PPPD_PATHS)
                .ok_or_else(|| ModuleError::Resource("pppd executable not found".into()))?,
        };

        let addresses = match (ctx.get_option("ppp_addresses"), ctx.role) {
            (Some(pair), _) => Some(pair.to_string()),
            (None, Role::Initiator) => Some(INITIATOR_ADDRESSES.to_string()),
            (None, Role::Responder) => None,
        };

        debug!("Using {}", pppd.display());
        Ok(Self {
            pppd,
            addresses,
            child: None,
        })
    }

    /// Arguments passed to pppd
    pub fn arguments(&self) -> Vec<&str> {
        let mut args = PPPD_ARGS.to_vec();
        if let Some(pair) = &self.addresses {
            args.push(pair);
        }
        args
    }

    /// Process id of the running pppd
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl InterfaceModule for PppdInterface {
    fn run(&mut self, ends: InterfaceEnds<'_>) -> Result<(), ModuleError> {
        if self.child.is_some() {
            return Err(ModuleError::Lifecycle("pppd already running".into()));
        }
        let stdin = ends.read.try_clone_to_owned()?;
        let stdout = ends.write.try_clone_to_owned()?;

        let child = Command::new(&self.pppd)
            .args(self.arguments())
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .spawn()
            .map_err(|e| {
                ModuleError::Resource(format!("failed to start {}: {}", self.pppd.display(), e))
            })?;

        info!("Started {} (pid {})", self.pppd.display(), child.id());
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();
        // An exited but unreaped child still accepts signals
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            fatal(&format!("failed to signal pppd (pid {}): {}", pid, e));
        }
        match wait_within(&mut child, STOP_TIMEOUT) {
            Ok(Some(status)) => info!("pppd (pid {}) exited: {}", pid, status),
            Ok(None) => fatal(&format!(
                "pppd (pid {}) did not exit within {:?}",
                pid, STOP_TIMEOUT
            )),
            Err(e) => fatal(&format!("failed to reap pppd (pid {}): {}", pid, e)),
        }
        Ok(())
    }
}
