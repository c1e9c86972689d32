//! Virtual network interface management
//!
//! Create a TUN device, give it an IPv4 address, netmask and MTU, then exchange raw
//! IP packets with the host network stack through it.
//!
//! Linux uses the kernel TUN driver (`/dev/net/tun`) and configures the interface
//! through ioctls on a control socket. Windows drives an installed TAP-Windows
//! adapter, located through the registry.
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use vnic::DeviceHandle;
//!
//! # fn main() -> vnic::VnicResult<()> {
//! let mut dev = DeviceHandle::create("vnic0")?;
//! dev.set_address(
//!     IpAddr::V4(Ipv4Addr::new(10, 8, 0, 1)),
//!     None,
//!     IpAddr::V4(Ipv4Addr::new(255, 255, 255, 0)),
//! )?;
//! dev.set_mtu(1400)?;
//!
//! let mut buf = [0u8; 2048];
//! let n = dev.read_packet(&mut buf)?;
//! println!("{} bytes from {}", n, dev.name());
//! dev.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;

// Platform-specific modules - only compile on their target
#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

// Re-exports
pub use address::AddressConfig;
pub use config::{Config, ConfigError, InterfaceConfig};
pub use device::{DeviceHandle, PlatformTun, TunDevice};
pub use error::{VnicError, VnicResult};
pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};

/// Interface name requested when a configuration does not name one
pub const DEFAULT_DEVICE_NAME: &str = "vnic0";

/// Largest IPv4 packet a TUN read can return
pub const MAX_PACKET_SIZE: usize = 65535;
