//! Linux TUN implementation
//!
//! Uses the standard Linux TUN/TAP driver via /dev/net/tun. Packets move through
//! the TUN file descriptor; all configuration goes through a separate control socket.

mod control;
mod ifreq;

pub use control::{ControlSocket, InterfaceControl, InterfaceFlags};
pub use ifreq::{IfName, IFNAMSIZ};

use crate::address::AddressConfig;
use crate::device::TunDevice;
use crate::error::{VnicError, VnicResult};
use ifreq::{IfReqFlags, IFF_NO_PI, IFF_TUN, TUNSETIFF};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

/// Path of the TUN clone device
pub const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Linux TUN device
pub struct LinuxTun {
    name: String,
    ifname: IfName,
    index: u32,
    mtu: Option<u32>,
    fds: Option<TunFds>,
}

/// Data-plane descriptor and control socket, always held and released together
struct TunFds {
    data: File,
    ctl: ControlSocket,
}

impl TunFds {
    fn close(self) -> VnicResult<()> {
        // Both descriptors are closed even if the first close fails
        let data = control::close_fd(OwnedFd::from(self.data));
        let ctl = self.ctl.close();
        data.map_err(|e| VnicError::native("close", e))?;
        ctl.map_err(|e| VnicError::native("close", e))
    }
}

impl LinuxTun {
    /// Create a new TUN device.
    ///
    /// The kernel may assign a different name than requested (an empty name or a
    /// `%d` template yields `tun0`, `tun1`, ...); the assigned name is adopted.
    pub fn create(name: &str) -> VnicResult<Self> {
        let requested = IfName::new(name)?;

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(TUN_DEVICE_PATH)
            .map_err(|e| VnicError::unavailable(TUN_DEVICE_PATH, e))?;

        let mut ifr = IfReqFlags::new(&requested, IFF_TUN | IFF_NO_PI);
        // On failure `data` is dropped, closing the descriptor
        control::ioctl(data.as_raw_fd(), TUNSETIFF, &mut ifr).map_err(|e| {
            if is_permission_error(&e) {
                tracing::warn!("TUNSETIFF refused; CAP_NET_ADMIN is required to create {}", requested);
            }
            VnicError::unavailable(format!("{} ({})", TUN_DEVICE_PATH, requested), e)
        })?;

        // Get actual device name
        let ifname = IfName::from_raw(ifr.name);

        let ctl = ControlSocket::open().map_err(|e| VnicError::native("socket", e))?;
        let index = ctl
            .index(&ifname)
            .map_err(|e| VnicError::native("SIOCGIFINDEX", e))?;
        let mtu = ctl
            .mtu(&ifname)
            .map_err(|e| VnicError::native("SIOCGIFMTU", e))?;

        let name = ifname.to_string();
        if name != requested.to_string() {
            tracing::debug!("Requested TUN name '{}', kernel assigned '{}'", requested, name);
        }
        tracing::info!("Created TUN device: {} (index {}, mtu {})", name, index, mtu);

        Ok(Self {
            name,
            ifname,
            index: index as u32,
            mtu: u32::try_from(mtu).ok(),
            fds: Some(TunFds { data, ctl }),
        })
    }

    fn fds(&self) -> VnicResult<&TunFds> {
        self.fds.as_ref().ok_or(VnicError::ClosedHandle)
    }

    /// Kernel interface index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Current administrative flags as reported by the kernel
    pub fn flags(&self) -> VnicResult<InterfaceFlags> {
        self.fds()?
            .ctl
            .flags(&self.ifname)
            .map_err(|e| VnicError::native("SIOCGIFFLAGS", e))
    }

    /// Get raw file descriptor of the data plane (for polling or timeouts)
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fds.as_ref().map(|fds| fds.data.as_raw_fd())
    }
}

impl TunDevice for LinuxTun {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_address(&mut self, config: &AddressConfig) -> VnicResult<()> {
        let fds = self.fds()?;
        let flags = control::apply_address(&fds.ctl, &self.ifname, config)?;
        tracing::info!(
            "{}: address {} netmask {} broadcast {:?} (flags {:#06x})",
            self.name,
            config.ip(),
            config.netmask(),
            config.broadcast(),
            flags.bits()
        );
        Ok(())
    }

    fn set_mtu(&mut self, mtu: u32) -> VnicResult<()> {
        let value = libc::c_int::try_from(mtu).map_err(|_| VnicError::InvalidMtu(mtu))?;
        self.fds()?
            .ctl
            .set_mtu(&self.ifname, value)
            .map_err(|e| VnicError::native("SIOCSIFMTU", e))?;
        self.mtu = Some(mtu);
        tracing::info!("{}: mtu {}", self.name, mtu);
        Ok(())
    }

    fn mtu(&self) -> Option<u32> {
        self.mtu
    }

    fn read(&self, buf: &mut [u8]) -> VnicResult<usize> {
        let mut fd = &self.fds()?.data;
        fd.read(buf).map_err(|e| VnicError::native("read", e))
    }

    fn write(&self, buf: &[u8]) -> VnicResult<usize> {
        let mut fd = &self.fds()?.data;
        fd.write(buf).map_err(|e| VnicError::native("write", e))
    }

    fn close(&mut self) -> VnicResult<()> {
        let fds = self.fds.take().ok_or(VnicError::ClosedHandle)?;
        tracing::debug!("Closing TUN device: {}", self.name);
        fds.close()
    }
}

impl Drop for LinuxTun {
    fn drop(&mut self) {
        if self.fds.is_some() {
            tracing::debug!("Dropping open TUN device: {}", self.name);
        }
    }
}

impl std::fmt::Debug for LinuxTun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxTun")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("mtu", &self.mtu)
            .field("closed", &self.fds.is_none())
            .finish()
    }
}

/// True when `e` is the kernel refusing an operation for lack of privilege
pub fn is_permission_error(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EPERM) | Some(libc::EACCES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_name_opens_nothing() {
        let err = LinuxTun::create("name_that_is_far_too_long").unwrap_err();
        assert!(matches!(err, VnicError::InvalidName(_)));
    }

    #[test]
    fn test_create_adopts_kernel_name_or_reports_unavailable() {
        match LinuxTun::create("vnict%d") {
            Ok(mut tun) => {
                assert!(tun.name().starts_with("vnict"));
                assert!(!tun.name().contains('%'));
                assert!(tun.index() > 0);
                assert!(tun.raw_fd().is_some());
                tun.close().unwrap();
                assert!(tun.raw_fd().is_none());
            }
            Err(VnicError::ResourceUnavailable { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_permission_error_detection() {
        assert!(is_permission_error(&io::Error::from_raw_os_error(libc::EPERM)));
        assert!(!is_permission_error(&io::Error::from_raw_os_error(libc::ENOENT)));
    }
}
