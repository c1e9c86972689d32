//! Interface configuration through a control socket
//!
//! Address, flag and MTU ioctls are issued against an unbound `AF_INET` datagram
//! socket rather than the TUN descriptor itself, which only carries packets.

use super::ifreq::{
    IfName, IfReqAddr, IfReqFlags, IfReqInt, SIOCGIFFLAGS, SIOCGIFINDEX, SIOCGIFMTU,
    SIOCSIFADDR, SIOCSIFBRDADDR, SIOCSIFFLAGS, SIOCSIFMTU, SIOCSIFNETMASK,
};
use crate::address::AddressConfig;
use crate::error::{VnicError, VnicResult};
use std::io;
use std::net::Ipv4Addr;
use std::ops::BitOr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

/// Administrative interface flags (`IFF_*` from `<net/if.h>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceFlags(u16);

impl InterfaceFlags {
    /// Interface is administratively up
    pub const UP: Self = Self(0x0001);
    /// Broadcast address is valid
    pub const BROADCAST: Self = Self(0x0002);
    /// Point-to-point link
    pub const POINTOPOINT: Self = Self(0x0010);
    /// Resources allocated, link active
    pub const RUNNING: Self = Self(0x0040);
    /// No ARP protocol
    pub const NOARP: Self = Self(0x0080);

    /// Build from raw flag bits
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Up
    pub fn is_up(self) -> bool {
        self.contains(Self::UP)
    }

    /// Running
    pub fn is_running(self) -> bool {
        self.contains(Self::RUNNING)
    }

    /// Broadcast enabled
    pub fn is_broadcast(self) -> bool {
        self.contains(Self::BROADCAST)
    }

    fn from_short(raw: libc::c_short) -> Self {
        Self(raw as u16)
    }

    fn to_short(self) -> libc::c_short {
        self.0 as libc::c_short
    }
}

impl BitOr for InterfaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The interface ioctls used by the configuration protocol
pub trait InterfaceControl {
    /// SIOCSIFADDR
    fn set_addr(&self, name: &IfName, addr: Ipv4Addr) -> io::Result<()>;
    /// SIOCSIFNETMASK
    fn set_netmask(&self, name: &IfName, mask: Ipv4Addr) -> io::Result<()>;
    /// SIOCSIFBRDADDR
    fn set_broadcast(&self, name: &IfName, addr: Ipv4Addr) -> io::Result<()>;
    /// SIOCGIFFLAGS
    fn flags(&self, name: &IfName) -> io::Result<InterfaceFlags>;
    /// SIOCSIFFLAGS
    fn set_flags(&self, name: &IfName, flags: InterfaceFlags) -> io::Result<()>;
    /// SIOCGIFMTU
    fn mtu(&self, name: &IfName) -> io::Result<libc::c_int>;
    /// SIOCSIFMTU
    fn set_mtu(&self, name: &IfName, mtu: libc::c_int) -> io::Result<()>;
    /// SIOCGIFINDEX
    fn index(&self, name: &IfName) -> io::Result<libc::c_int>;
}

/// Issue one ioctl, turning a negative return into the thread's OS error.
pub(crate) fn ioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    // SAFETY: `arg` is a live, exclusively borrowed `ifreq` record of the size the
    // request expects; the kernel only accesses it for the duration of the call.
    let ret = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Close a descriptor and report the result instead of discarding it.
pub(crate) fn close_fd(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: `raw` came out of an `OwnedFd`, so it is open and owned by nobody else.
    if unsafe { libc::close(raw) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Unbound `AF_INET` datagram socket carrying configuration ioctls
#[derive(Debug)]
pub struct ControlSocket {
    fd: OwnedFd,
}

impl ControlSocket {
    /// Open a new control socket
    pub fn open() -> io::Result<Self> {
        // SAFETY: plain socket(2) call; ownership of the result is taken immediately.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Close the socket, reporting any error from close(2)
    pub fn close(self) -> io::Result<()> {
        close_fd(self.fd)
    }

    fn set_addr_ioctl(&self, request: libc::c_ulong, name: &IfName, addr: Ipv4Addr) -> io::Result<()> {
        let mut req = IfReqAddr::new(name, addr);
        ioctl(self.fd.as_raw_fd(), request, &mut req)
    }

    fn get_int_ioctl(&self, request: libc::c_ulong, name: &IfName) -> io::Result<libc::c_int> {
        let mut req = IfReqInt::new(name, 0);
        ioctl(self.fd.as_raw_fd(), request, &mut req)?;
        Ok(req.value)
    }
}

impl AsRawFd for ControlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl InterfaceControl for ControlSocket {
    fn set_addr(&self, name: &IfName, addr: Ipv4Addr) -> io::Result<()> {
        self.set_addr_ioctl(SIOCSIFADDR, name, addr)
    }

    fn set_netmask(&self, name: &IfName, mask: Ipv4Addr) -> io::Result<()> {
        self.set_addr_ioctl(SIOCSIFNETMASK, name, mask)
    }

    fn set_broadcast(&self, name: &IfName, addr: Ipv4Addr) -> io::Result<()> {
        self.set_addr_ioctl(SIOCSIFBRDADDR, name, addr)
    }

    fn flags(&self, name: &IfName) -> io::Result<InterfaceFlags> {
        let mut req = IfReqFlags::new(name, 0);
        ioctl(self.fd.as_raw_fd(), SIOCGIFFLAGS, &mut req)?;
        Ok(InterfaceFlags::from_short(req.flags))
    }

    fn set_flags(&self, name: &IfName, flags: InterfaceFlags) -> io::Result<()> {
        let mut req = IfReqFlags::new(name, flags.to_short());
        ioctl(self.fd.as_raw_fd(), SIOCSIFFLAGS, &mut req)
    }

    fn mtu(&self, name: &IfName) -> io::Result<libc::c_int> {
        self.get_int_ioctl(SIOCGIFMTU, name)
    }

    fn set_mtu(&self, name: &IfName, mtu: libc::c_int) -> io::Result<()> {
        let mut req = IfReqInt::new(name, mtu);
        ioctl(self.fd.as_raw_fd(), SIOCSIFMTU, &mut req)
    }

    fn index(&self, name: &IfName) -> io::Result<libc::c_int> {
        self.get_int_ioctl(SIOCGIFINDEX, name)
    }
}

/// Read the current flags, OR in `bits` and write the result back.
pub(crate) fn raise_flags<C: InterfaceControl + ?Sized>(
    ctl: &C,
    name: &IfName,
    bits: InterfaceFlags,
) -> VnicResult<InterfaceFlags> {
    let current = ctl
        .flags(name)
        .map_err(|e| VnicError::native("SIOCGIFFLAGS", e))?;
    let updated = current | bits;
    ctl.set_flags(name, updated)
        .map_err(|e| VnicError::native("SIOCSIFFLAGS", e))?;
    tracing::debug!("{}: flags {:#06x} -> {:#06x}", name, current.bits(), updated.bits());
    Ok(updated)
}

/// Address, netmask, optional broadcast, then up + running (+ broadcast).
///
/// Each step aborts the sequence on failure; nothing already applied is rolled back.
pub(crate) fn apply_address<C: InterfaceControl + ?Sized>(
    ctl: &C,
    name: &IfName,
    config: &AddressConfig,
) -> VnicResult<InterfaceFlags> {
    ctl.set_addr(name, config.ip())
        .map_err(|e| VnicError::native("SIOCSIFADDR", e))?;
    tracing::debug!("{}: address {}", name, config.ip());

    ctl.set_netmask(name, config.netmask())
        .map_err(|e| VnicError::native("SIOCSIFNETMASK", e))?;
    tracing::debug!("{}: netmask {}", name, config.netmask());

    let flags = match config.broadcast() {
        Some(broadcast) => {
            ctl.set_broadcast(name, broadcast)
                .map_err(|e| VnicError::native("SIOCSIFBRDADDR", e))?;
            tracing::debug!("{}: broadcast {}", name, broadcast);
            InterfaceFlags::UP | InterfaceFlags::RUNNING | InterfaceFlags::BROADCAST
        }
        None => InterfaceFlags::UP | InterfaceFlags::RUNNING,
    };

    raise_flags(ctl, name, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        SetAddr(Ipv4Addr),
        SetNetmask(Ipv4Addr),
        SetBroadcast(Ipv4Addr),
        GetFlags,
        SetFlags(u16),
    }

    /// Records every ioctl and emulates the kernel's flag word
    struct RecordingControl {
        calls: RefCell<Vec<Call>>,
        flags: Cell<u16>,
        fail_on: Option<&'static str>,
    }

    impl RecordingControl {
        fn new(initial_flags: u16) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                flags: Cell::new(initial_flags),
                fail_on: None,
            }
        }

        fn failing(op: &'static str) -> Self {
            Self {
                fail_on: Some(op),
                ..Self::new(0)
            }
        }

        fn record(&self, op: &'static str, call: Call) -> io::Result<()> {
            self.calls.borrow_mut().push(call);
            if self.fail_on == Some(op) {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl InterfaceControl for RecordingControl {
        fn set_addr(&self, _name: &IfName, addr: Ipv4Addr) -> io::Result<()> {
            self.record("addr", Call::SetAddr(addr))
        }

        fn set_netmask(&self, _name: &IfName, mask: Ipv4Addr) -> io::Result<()> {
            self.record("netmask", Call::SetNetmask(mask))
        }

        fn set_broadcast(&self, _name: &IfName, addr: Ipv4Addr) -> io::Result<()> {
            self.record("broadcast", Call::SetBroadcast(addr))
        }

        fn flags(&self, _name: &IfName) -> io::Result<InterfaceFlags> {
            self.record("get_flags", Call::GetFlags)?;
            Ok(InterfaceFlags::from_bits(self.flags.get()))
        }

        fn set_flags(&self, _name: &IfName, flags: InterfaceFlags) -> io::Result<()> {
            self.record("set_flags", Call::SetFlags(flags.bits()))?;
            self.flags.set(flags.bits());
            Ok(())
        }

        fn mtu(&self, _name: &IfName) -> io::Result<libc::c_int> {
            Ok(1500)
        }

        fn set_mtu(&self, _name: &IfName, _mtu: libc::c_int) -> io::Result<()> {
            Ok(())
        }

        fn index(&self, _name: &IfName) -> io::Result<libc::c_int> {
            Ok(1)
        }
    }

    fn tun0() -> IfName {
        IfName::new("tun0").unwrap()
    }

    const IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
    const BRD: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 255);

    #[test]
    fn test_with_broadcast_sets_broadcast_flag() {
        let ctl = RecordingControl::new(0);
        let flags = apply_address(&ctl, &tun0(), &AddressConfig::v4(IP, Some(BRD), MASK)).unwrap();

        assert!(flags.is_up() && flags.is_running() && flags.is_broadcast());
        assert_eq!(
            ctl.calls(),
            vec![
                Call::SetAddr(IP),
                Call::SetNetmask(MASK),
                Call::SetBroadcast(BRD),
                Call::GetFlags,
                Call::SetFlags(0x0043),
            ]
        );
    }

    #[test]
    fn test_without_broadcast_leaves_flag_clear() {
        let ctl = RecordingControl::new(0);
        let flags = apply_address(&ctl, &tun0(), &AddressConfig::v4(IP, None, MASK)).unwrap();

        assert!(flags.is_up() && flags.is_running());
        assert!(!flags.is_broadcast());
        assert_eq!(
            ctl.calls(),
            vec![
                Call::SetAddr(IP),
                Call::SetNetmask(MASK),
                Call::GetFlags,
                Call::SetFlags(0x0041),
            ]
        );
    }

    #[test]
    fn test_existing_flags_are_preserved() {
        // TUN interfaces come up as POINTOPOINT | NOARP | MULTICAST
        let initial = 0x0090 | 0x1000;
        let ctl = RecordingControl::new(initial);
        let flags = apply_address(&ctl, &tun0(), &AddressConfig::v4(IP, None, MASK)).unwrap();

        assert!(flags.contains(InterfaceFlags::POINTOPOINT | InterfaceFlags::NOARP));
        assert_eq!(flags.bits(), initial | 0x0041);
    }

    #[test]
    fn test_failure_aborts_remaining_steps() {
        let ctl = RecordingControl::failing("netmask");
        let err = apply_address(&ctl, &tun0(), &AddressConfig::v4(IP, Some(BRD), MASK)).unwrap_err();

        match err {
            VnicError::NativeCall { op, source } => {
                assert_eq!(op, "SIOCSIFNETMASK");
                assert_eq!(source.raw_os_error(), Some(libc::EPERM));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ctl.calls(), vec![Call::SetAddr(IP), Call::SetNetmask(MASK)]);
    }

    #[test]
    fn test_flag_write_failure_is_reported() {
        let ctl = RecordingControl::failing("set_flags");
        let err = apply_address(&ctl, &tun0(), &AddressConfig::v4(IP, None, MASK)).unwrap_err();
        assert!(matches!(err, VnicError::NativeCall { op: "SIOCSIFFLAGS", .. }));
    }

    #[test]
    fn test_flags_helpers() {
        let flags = InterfaceFlags::UP | InterfaceFlags::BROADCAST;
        assert!(flags.is_up());
        assert!(flags.is_broadcast());
        assert!(!flags.is_running());
        assert_eq!(InterfaceFlags::default().bits(), 0);
    }
}
