//! TUN/TAP device as the link-layer endpoint
//!
//! The device is created at `init` through `/dev/net/tun`; its name is
//! chosen by the kernel unless `device=<name>` is given. A bridge worker
//! then copies whole reads between the device and the channel ends.

use std::os::fd::{AsFd, OwnedFd};
use std::time::Duration;

use tracing::info;

use crate::bridge::{set_nonblocking, Bridge, DEFAULT_POLL_TIMEOUT};
use crate::interface::worker::BridgeWorker;
use crate::module::{
    InterfaceDescriptor, InterfaceEnds, InterfaceModule, ModuleContext, ModuleError,
};
use crate::utils::STOP_TIMEOUT;

pub const TUN_DESCRIPTOR: InterfaceDescriptor = InterfaceDescriptor {
    name: "tun",
    description: "TUN network interface (IP packets)",
    required_options: &[],
    init: init_tun,
};

pub const TAP_DESCRIPTOR: InterfaceDescriptor = InterfaceDescriptor {
    name: "tap",
    description: "TAP network interface (Ethernet frames)",
    required_options: &[],
    init: init_tap,
};

/// Layer the device operates at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Tun,
    Tap,
}

fn init_tun(ctx: &ModuleContext) -> Result<Box<dyn InterfaceModule>, ModuleError> {
    Ok(Box::new(TunInterface::open(DeviceMode::Tun, ctx.get_option("device"))?))
}

fn init_tap(ctx: &ModuleContext) -> Result<Box<dyn InterfaceModule>, ModuleError> {
    Ok(Box::new(TunInterface::open(DeviceMode::Tap, ctx.get_option("device"))?))
}

pub struct TunInterface {
    device: OwnedFd,
    name: String,
    timeout: Duration,
    worker: Option<BridgeWorker>,
}

impl TunInterface {
    /// Create the device
    pub fn open(mode: DeviceMode, requested: Option<&str>) -> Result<Self, ModuleError> {
        let (device, name) = device::create(mode, requested)?;
        info!("Created {:?} device {}", mode, name);
        Ok(Self {
            device,
            name,
            timeout: DEFAULT_POLL_TIMEOUT,
            worker: None,
        })
    }
}

impl InterfaceModule for TunInterface {
    fn run(&mut self, ends: InterfaceEnds<'_>) -> Result<(), ModuleError> {
        if self.worker.is_some() {
            return Err(ModuleError::Lifecycle(format!("{} already running", self.name)));
        }
        let from_transport = ends.read.try_clone_to_owned()?;
        let to_transport = ends.write.try_clone_to_owned()?;
        set_nonblocking(from_transport.as_fd())?;
        set_nonblocking(to_transport.as_fd())?;
        let device_in = self.device.try_clone()?;
        let device_out = self.device.try_clone()?;

        let bridge = Bridge::new()
            .with_timeout(self.timeout)
            .direction(from_transport, device_in)
            .direction(device_out, to_transport);
        self.worker = Some(BridgeWorker::spawn(&self.name, bridge)?);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.stop(STOP_TIMEOUT) {
                info!("{} bridge ended: {}", self.name, e);
            }
        }
        Ok(())
    }

    fn fini(self: Box<Self>) {
        info!("Closing device {}", self.name);
    }
}

#[cfg(target_os = "linux")]
mod device {
    use std::fs::OpenOptions;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::os::unix::fs::OpenOptionsExt;

    use super::DeviceMode;
    use crate::module::ModuleError;
    use crate::utils::ensure_invariant;

    const TUN_PATH: &str = "/dev/net/tun";
    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_TAP: libc::c_short = 0x0002;

    /// `struct ifreq` restricted to the name and flags members
    #[repr(C)]
    pub struct IfReq {
        name: [libc::c_char; libc::IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    nix::ioctl_write_ptr_bad!(tunsetiff, TUNSETIFF, IfReq);

    pub(super) fn create(
        mode: DeviceMode,
        requested: Option<&str>,
    ) -> Result<(OwnedFd, String), ModuleError> {
        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            flags: match mode {
                DeviceMode::Tun => IFF_TUN,
                DeviceMode::Tap => IFF_TAP,
            },
            _pad: [0; 22],
        };
        if let Some(name) = requested {
            if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.contains('\0') {
                return Err(ModuleError::Config(format!("invalid device name '{}'", name)));
            }
            for (slot, byte) in req.name.iter_mut().zip(name.bytes()) {
                *slot = byte as libc::c_char;
            }
        }

        // std opens with O_CLOEXEC
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(TUN_PATH)
            .map_err(|e| ModuleError::Resource(format!("cannot open {}: {}", TUN_PATH, e)))?;

        // SAFETY: `req` is a properly sized, initialized ifreq that outlives
        // the call, and the descriptor is open. The kernel writes the
        // assigned name back through the pointer.
        unsafe { tunsetiff(file.as_raw_fd(), &mut req as *mut IfReq as *const IfReq) }
            .map_err(|e| ModuleError::Resource(format!("TUNSETIFF failed: {}", e)))?;

        let name: Vec<u8> = req
            .name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        ensure_invariant(!name.is_empty(), "kernel returned an unnamed TUN/TAP device");
        Ok((OwnedFd::from(file), String::from_utf8_lossy(&name).into_owned()))
    }

}

#[cfg(not(target_os = "linux"))]
mod device {
    use std::os::fd::OwnedFd;

    use super::DeviceMode;
    use crate::module::ModuleError;

    pub(super) fn create(
        _mode: DeviceMode,
        _requested: Option<&str>,
    ) -> Result<(OwnedFd, String), ModuleError> {
        Err(ModuleError::Resource(
            "TUN/TAP devices are only supported on Linux".into(),
        ))
    }
}
