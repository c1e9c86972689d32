//! Fixed-layout `struct ifreq` records for the interface ioctls
//!
//! The kernel's `struct ifreq` is 40 bytes on every Linux ABI: a 16-byte,
//! NUL-terminated name at offset 0 followed by a 24-byte union at offset 16.
//! Each record below fills the union with the one member its ioctl reads or
//! writes and zero-pads the remainder.

use crate::error::{VnicError, VnicResult};
use std::fmt;
use std::mem;
use std::net::Ipv4Addr;

/// Size of the interface name field, including the trailing NUL
pub const IFNAMSIZ: usize = 16;

const IFREQ_SIZE: usize = 40;
#[cfg(test)]
const UNION_OFFSET: usize = IFNAMSIZ;

// `_IOW` encoding from <asm/ioctl.h>; mips, powerpc and sparc use a 3-bit direction
// field with a different write bit.
#[cfg(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
const IOC_WRITE: libc::c_ulong = 4 << 29;
#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
const IOC_WRITE: libc::c_ulong = 1 << 30;

const fn iow(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    IOC_WRITE | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
}

/// `_IOW('T', 202, int)` from <linux/if_tun.h>
pub(crate) const TUNSETIFF: libc::c_ulong = iow(b'T', 202, mem::size_of::<libc::c_int>());

// Socket ioctls from <linux/sockios.h>; identical on every architecture
pub(crate) const SIOCGIFFLAGS: libc::c_ulong = libc::SIOCGIFFLAGS as libc::c_ulong;
pub(crate) const SIOCSIFFLAGS: libc::c_ulong = libc::SIOCSIFFLAGS as libc::c_ulong;
pub(crate) const SIOCSIFADDR: libc::c_ulong = libc::SIOCSIFADDR as libc::c_ulong;
pub(crate) const SIOCSIFBRDADDR: libc::c_ulong = libc::SIOCSIFBRDADDR as libc::c_ulong;
pub(crate) const SIOCSIFNETMASK: libc::c_ulong = libc::SIOCSIFNETMASK as libc::c_ulong;
pub(crate) const SIOCGIFMTU: libc::c_ulong = libc::SIOCGIFMTU as libc::c_ulong;
pub(crate) const SIOCSIFMTU: libc::c_ulong = libc::SIOCSIFMTU as libc::c_ulong;
pub(crate) const SIOCGIFINDEX: libc::c_ulong = libc::SIOCGIFINDEX as libc::c_ulong;

// TUNSETIFF mode flags
pub(crate) const IFF_TUN: libc::c_short = 0x0001;
pub(crate) const IFF_NO_PI: libc::c_short = 0x1000;

/// Interface name as the kernel stores it: at most 15 bytes plus NUL padding
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IfName([u8; IFNAMSIZ]);

impl IfName {
    /// Validate and encode a requested interface name.
    ///
    /// An empty name lets the kernel pick one (`tun0`, `tun1`, ...). Names may
    /// contain a `%d` template that the kernel replaces with a free number.
    pub fn new(name: &str) -> VnicResult<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= IFNAMSIZ {
            return Err(VnicError::InvalidName(format!(
                "'{}' is longer than {} bytes",
                name,
                IFNAMSIZ - 1
            )));
        }
        if bytes.contains(&0) || bytes.contains(&b'/') || bytes.iter().any(u8::is_ascii_whitespace)
        {
            return Err(VnicError::InvalidName(format!(
                "'{}' contains a forbidden character",
                name.escape_debug()
            )));
        }

        let mut raw = [0u8; IFNAMSIZ];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Take a name written back by the kernel, forcing NUL termination.
    pub(crate) fn from_raw(mut raw: [u8; IFNAMSIZ]) -> Self {
        raw[IFNAMSIZ - 1] = 0;
        Self(raw)
    }

    pub(crate) fn raw(&self) -> [u8; IFNAMSIZ] {
        self.0
    }

    /// Name bytes up to the first NUL
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
        &self.0[..len]
    }
}

impl fmt::Display for IfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for IfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IfName({:?})", self.to_string())
    }
}

/// `ifreq` carrying `ifr_flags` (TUNSETIFF, SIOCGIFFLAGS, SIOCSIFFLAGS)
#[repr(C)]
pub(crate) struct IfReqFlags {
    pub name: [u8; IFNAMSIZ],
    pub flags: libc::c_short,
    _padding: [u8; 22],
}

impl IfReqFlags {
    pub fn new(name: &IfName, flags: libc::c_short) -> Self {
        Self {
            name: name.raw(),
            flags,
            _padding: [0; 22],
        }
    }
}

/// `ifreq` carrying an IPv4 `sockaddr_in` (SIOCSIFADDR, SIOCSIFNETMASK, SIOCSIFBRDADDR)
#[repr(C)]
#[allow(dead_code)]
pub(crate) struct IfReqAddr {
    pub name: [u8; IFNAMSIZ],
    pub addr: libc::sockaddr_in,
    _padding: [u8; 8],
}

impl IfReqAddr {
    pub fn new(name: &IfName, addr: Ipv4Addr) -> Self {
        Self {
            name: name.raw(),
            addr: libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                // s_addr is in network byte order, i.e. the octets as laid out in memory
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(addr.octets()),
                },
                sin_zero: [0; 8],
            },
            _padding: [0; 8],
        }
    }
}

/// `ifreq` carrying a single `int` (SIOCGIFMTU, SIOCSIFMTU, SIOCGIFINDEX)
#[repr(C)]
#[allow(dead_code)]
pub(crate) struct IfReqInt {
    pub name: [u8; IFNAMSIZ],
    pub value: libc::c_int,
    _padding: [u8; 20],
}

impl IfReqInt {
    pub fn new(name: &IfName, value: libc::c_int) -> Self {
        Self {
            name: name.raw(),
            value,
            _padding: [0; 20],
        }
    }
}

const _: () = assert!(mem::size_of::<IfReqFlags>() == IFREQ_SIZE);
const _: () = assert!(mem::size_of::<IfReqAddr>() == IFREQ_SIZE);
const _: () = assert!(mem::size_of::<IfReqInt>() == IFREQ_SIZE);
const _: () = assert!(mem::size_of::<libc::sockaddr_in>() == 16);

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn offset_of<T, F>(base: &T, field: *const F) -> usize {
        field as usize - base as *const T as usize
    }

    #[test]
    fn test_union_members_start_at_offset_16() {
        let name = IfName::new("tun0").unwrap();

        let flags = IfReqFlags::new(&name, 0);
        assert_eq!(offset_of(&flags, ptr::addr_of!(flags.flags)), UNION_OFFSET);

        let addr = IfReqAddr::new(&name, Ipv4Addr::LOCALHOST);
        assert_eq!(offset_of(&addr, ptr::addr_of!(addr.addr)), UNION_OFFSET);

        let int = IfReqInt::new(&name, 0);
        assert_eq!(offset_of(&int, ptr::addr_of!(int.value)), UNION_OFFSET);
    }

    #[test]
    fn test_sockaddr_in_is_network_order() {
        let name = IfName::new("tun0").unwrap();
        let req = IfReqAddr::new(&name, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(req.addr.sin_addr.s_addr.to_ne_bytes(), [10, 1, 2, 3]);
        assert_eq!(req.addr.sin_family, libc::AF_INET as libc::sa_family_t);
        assert_eq!(req.addr.sin_port, 0);
    }

    #[test]
    fn test_name_validation() {
        assert_eq!(IfName::new("tun0").unwrap().to_string(), "tun0");
        assert_eq!(IfName::new("").unwrap().as_bytes(), b"");
        assert_eq!(IfName::new("vnic%d").unwrap().to_string(), "vnic%d");
        assert!(IfName::new("exactly15bytes_").is_ok());

        assert!(matches!(IfName::new("sixteen_bytes_xx"), Err(VnicError::InvalidName(_))));
        assert!(matches!(IfName::new("tun\0"), Err(VnicError::InvalidName(_))));
        assert!(matches!(IfName::new("a/b"), Err(VnicError::InvalidName(_))));
        assert!(matches!(IfName::new("a b"), Err(VnicError::InvalidName(_))));
    }

    #[test]
    fn test_request_codes() {
        #[cfg(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64", target_arch = "arm"))]
        assert_eq!(TUNSETIFF, 0x4004_54ca);
        #[cfg(any(target_arch = "powerpc64", target_arch = "mips"))]
        assert_eq!(TUNSETIFF, 0x8004_54ca);

        assert_eq!(TUNSETIFF & 0xffff, 0x54ca);
        assert_eq!(SIOCSIFMTU, 0x8922);
        assert_eq!(SIOCGIFINDEX, 0x8933);
    }

    #[test]
    fn test_from_raw_forces_termination() {
        let name = IfName::from_raw([b'x'; IFNAMSIZ]);
        assert_eq!(name.as_bytes().len(), IFNAMSIZ - 1);

        let mut raw = [0u8; IFNAMSIZ];
        raw[..4].copy_from_slice(b"tun3");
        assert_eq!(IfName::from_raw(raw).to_string(), "tun3");
    }
}
