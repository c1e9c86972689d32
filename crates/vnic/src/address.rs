//! IPv4 address configuration for a virtual interface

use crate::config::ConfigError;
use crate::error::{VnicError, VnicResult};
use std::net::{IpAddr, Ipv4Addr};

/// Address triple applied to an adapter in one configuration call.
///
/// Only IPv4 is supported. A missing broadcast address is a valid state of its own:
/// the adapter is brought up without the broadcast flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressConfig {
    ip: Ipv4Addr,
    broadcast: Option<Ipv4Addr>,
    netmask: Ipv4Addr,
}

impl AddressConfig {
    /// Build from caller-supplied addresses, rejecting any IPv6 input.
    pub fn new(ip: IpAddr, broadcast: Option<IpAddr>, netmask: IpAddr) -> VnicResult<Self> {
        let ip = require_v4(ip)?;
        let broadcast = broadcast.map(require_v4).transpose()?;
        let netmask = require_v4(netmask)?;
        Ok(Self::v4(ip, broadcast, netmask))
    }

    /// Build from IPv4 addresses directly.
    pub fn v4(ip: Ipv4Addr, broadcast: Option<Ipv4Addr>, netmask: Ipv4Addr) -> Self {
        Self {
            ip,
            broadcast,
            netmask,
        }
    }

    /// Build from an address and CIDR prefix length.
    pub fn with_prefix(ip: Ipv4Addr, prefix: u8, broadcast: Option<Ipv4Addr>) -> VnicResult<Self> {
        let netmask = prefix_to_mask(prefix).ok_or_else(|| {
            ConfigError::ValidationError(format!("invalid IPv4 prefix length: {}", prefix))
        })?;
        Ok(Self::v4(ip, broadcast, netmask))
    }

    /// Interface address
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Broadcast address, if any
    pub fn broadcast(&self) -> Option<Ipv4Addr> {
        self.broadcast
    }

    /// Netmask
    pub fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    /// Network address (`ip & netmask`)
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) & u32::from(self.netmask))
    }

    /// Prefix length, or `None` if the netmask is not contiguous.
    pub fn prefix_len(&self) -> Option<u8> {
        mask_to_prefix(self.netmask)
    }

    /// Directed broadcast address of the subnet (`ip | !netmask`).
    pub fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) | !u32::from(self.netmask))
    }
}

fn require_v4(addr: IpAddr) -> VnicResult<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(VnicError::UnsupportedAddressFamily(addr)),
    }
}

/// Convert CIDR prefix to IPv4 subnet mask
pub fn prefix_to_mask(prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let mask: u32 = if prefix == 0 {
        0
    } else {
        !0u32 << (32 - prefix)
    };
    Some(Ipv4Addr::from(mask))
}

/// Convert an IPv4 subnet mask to its prefix length
pub fn mask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    // Contiguous masks have no set bits after the leading run
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return None;
    }
    Some(prefix as u8)
}
