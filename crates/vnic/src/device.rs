//! TUN device abstraction
//!
//! This module provides a cross-platform interface for TUN devices. The backend is
//! chosen at compile time: Linux uses `/dev/net/tun`, Windows the TAP-Windows driver.

use crate::address::AddressConfig;
use crate::config::InterfaceConfig;
use crate::error::VnicResult;

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
use crate::error::VnicError;
use std::io;
use std::net::IpAddr;

/// Backend contract implemented once per platform
pub trait TunDevice: Send + Sync {
    /// Get the device name assigned by the OS
    fn name(&self) -> &str;

    /// Assign address, netmask and optional broadcast, then bring the device up
    fn set_address(&mut self, config: &AddressConfig) -> VnicResult<()>;

    /// Set the MTU
    fn set_mtu(&mut self, mtu: u32) -> VnicResult<()>;

    /// Last MTU known to the device, if any
    fn mtu(&self) -> Option<u32>;

    /// Read a packet from the device (blocking)
    fn read(&self, buf: &mut [u8]) -> VnicResult<usize>;

    /// Write a packet to the device (blocking)
    fn write(&self, buf: &[u8]) -> VnicResult<usize>;

    /// Release every native resource held by the device
    fn close(&mut self) -> VnicResult<()>;
}

/// Backend selected for the build target
#[cfg(target_os = "linux")]
pub type PlatformTun = crate::linux::LinuxTun;

/// Backend selected for the build target
#[cfg(target_os = "windows")]
pub type PlatformTun = crate::windows::WindowsTap;

/// Backend selected for the build target
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub type PlatformTun = UnsupportedTun;

/// Handle to a TUN device - cross-platform wrapper
pub struct DeviceHandle {
    inner: PlatformTun,
}

impl DeviceHandle {
    /// Create a new TUN device.
    ///
    /// `name` is a request: Linux may assign a different name (see [`name`](Self::name)),
    /// Windows ignores it and opens the installed TAP adapter.
    pub fn create(name: &str) -> VnicResult<Self> {
        let inner = PlatformTun::create(name)?;
        Ok(Self { inner })
    }

    /// Create a device and apply the interface configuration to it.
    ///
    /// The device is released again if any configuration step fails.
    pub fn from_config(config: &InterfaceConfig) -> VnicResult<Self> {
        let address = config.address_config()?;
        let mut handle = Self::create(&config.name)?;
        if let Err(e) = handle.apply(&address, config.mtu) {
            let _ = handle.close();
            return Err(e);
        }
        Ok(handle)
    }

    /// Get device name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Assign an IPv4 address, optional broadcast address and netmask and bring the
    /// device up. IPv6 input is rejected before any native call is made.
    pub fn set_address(
        &mut self,
        ip: IpAddr,
        broadcast: Option<IpAddr>,
        netmask: IpAddr,
    ) -> VnicResult<()> {
        let config = AddressConfig::new(ip, broadcast, netmask)?;
        self.inner.set_address(&config)
    }

    /// Apply a prepared address configuration
    pub fn set_address_config(&mut self, config: &AddressConfig) -> VnicResult<()> {
        self.inner.set_address(config)
    }

    /// Set the MTU
    pub fn set_mtu(&mut self, mtu: u32) -> VnicResult<()> {
        self.inner.set_mtu(mtu)
    }

    /// Last known MTU
    pub fn mtu(&self) -> Option<u32> {
        self.inner.mtu()
    }

    /// Apply address and (optionally) MTU from an interface configuration
    pub fn configure(&mut self, config: &InterfaceConfig) -> VnicResult<()> {
        let address = config.address_config()?;
        self.apply(&address, config.mtu)
    }

    fn apply(&mut self, address: &AddressConfig, mtu: Option<u32>) -> VnicResult<()> {
        self.inner.set_address(address)?;
        if let Some(mtu) = mtu {
            self.inner.set_mtu(mtu)?;
        }
        tracing::info!(
            "TUN device {} configured with {}/{}",
            self.name(),
            address.ip(),
            address.netmask()
        );
        Ok(())
    }

    /// Read a packet from the device
    pub fn read_packet(&self, buf: &mut [u8]) -> VnicResult<usize> {
        self.inner.read(buf)
    }

    /// Write a packet to the device
    pub fn write_packet(&self, buf: &[u8]) -> VnicResult<usize> {
        self.inner.write(buf)
    }

    /// Close the device. A second call fails with
    /// [`ClosedHandle`](crate::VnicError::ClosedHandle).
    pub fn close(&mut self) -> VnicResult<()> {
        self.inner.close()
    }

    /// Access the platform device
    pub fn platform(&self) -> &PlatformTun {
        &self.inner
    }
}

impl io::Read for DeviceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.inner.read(buf)?)
    }
}

impl io::Write for DeviceHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.inner.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// I/O permission for adapters that must be configured before carrying packets.
///
/// Starts closed. The first [`open`](Self::open) lets I/O through for good; only
/// releasing the device closes it again.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadyGate {
    ready: bool,
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
impl ReadyGate {
    /// `NotReady` until the gate has been opened
    pub fn check(&self) -> VnicResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(crate::error::VnicError::NotReady)
        }
    }

    /// Mark configuration complete
    pub fn open(&mut self) {
        self.ready = true;
    }

    /// Reset when the device is released
    pub fn close(&mut self) {
        self.ready = false;
    }

    pub fn is_open(&self) -> bool {
        self.ready
    }
}

/// Placeholder backend for targets without TUN support
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub struct UnsupportedTun;

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
impl UnsupportedTun {
    fn create(_name: &str) -> VnicResult<Self> {
        Err(VnicError::PlatformNotSupported(
            "TUN devices not supported on this platform".into(),
        ))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
impl TunDevice for UnsupportedTun {
    fn name(&self) -> &str {
        "unknown"
    }

    fn set_address(&mut self, _config: &AddressConfig) -> VnicResult<()> {
        Err(VnicError::PlatformNotSupported("set_address".into()))
    }

    fn set_mtu(&mut self, _mtu: u32) -> VnicResult<()> {
        Err(VnicError::PlatformNotSupported("set_mtu".into()))
    }

    fn mtu(&self) -> Option<u32> {
        None
    }

    fn read(&self, _buf: &mut [u8]) -> VnicResult<usize> {
        Err(VnicError::PlatformNotSupported("read".into()))
    }

    fn write(&self, _buf: &[u8]) -> VnicResult<usize> {
        Err(VnicError::PlatformNotSupported("write".into()))
    }

    fn close(&mut self) -> VnicResult<()> {
        Err(VnicError::PlatformNotSupported("close".into()))
    }
}
