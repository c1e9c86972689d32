//! Device error types

use std::io;
use std::net::IpAddr;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for device operations
pub type VnicResult<T> = Result<T, VnicError>;

/// Errors that can occur while managing a virtual interface
#[derive(Debug, Error)]
pub enum VnicError {
    /// The native device or adapter cannot be opened
    #[error("{resource} unavailable: {source}")]
    ResourceUnavailable {
        /// Device path, registry key or adapter being opened
        resource: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// An IPv6 address was passed to an IPv4-only operation
    #[error("unsupported address family: {0} (only IPv4 is supported)")]
    UnsupportedAddressFamily(IpAddr),

    /// A single native call (ioctl, DeviceIoControl, read, write, close) failed
    #[error("{op} failed: {source}")]
    NativeCall {
        /// Name of the failing call
        op: &'static str,
        /// OS error, unchanged
        #[source]
        source: io::Error,
    },

    /// I/O attempted before the adapter was configured
    #[error("adapter used but not yet configured")]
    NotReady,

    /// Operation attempted after `close`
    #[error("device handle is closed")]
    ClosedHandle,

    /// Interface name cannot be passed to the kernel
    #[error("invalid interface name: {0}")]
    InvalidName(String),

    /// MTU not representable by the native call
    #[error("invalid MTU: {0}")]
    InvalidMtu(u32),

    /// External configuration tool exited unsuccessfully
    #[error("`{command}` failed: {message}")]
    ExternalCommand {
        /// Command line that was run
        command: String,
        /// Exit status and captured stderr
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Platform not supported
    #[error("platform not supported: {0}")]
    PlatformNotSupported(String),
}

impl VnicError {
    /// Wrap an OS error returned by the named native call.
    pub(crate) fn native(op: &'static str, source: io::Error) -> Self {
        VnicError::NativeCall { op, source }
    }

    /// Wrap an open failure on the named resource.
    pub(crate) fn unavailable(resource: impl Into<String>, source: io::Error) -> Self {
        VnicError::ResourceUnavailable {
            resource: resource.into(),
            source,
        }
    }
}

impl From<VnicError> for io::Error {
    fn from(e: VnicError) -> Self {
        match e {
            VnicError::ResourceUnavailable { source, .. } => source,
            VnicError::NativeCall { source, .. } => source,
            VnicError::ClosedHandle => io::Error::new(io::ErrorKind::NotConnected, e),
            VnicError::UnsupportedAddressFamily(_)
            | VnicError::InvalidName(_)
            | VnicError::InvalidMtu(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            VnicError::PlatformNotSupported(_) => io::Error::new(io::ErrorKind::Unsupported, e),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_native_error_is_passed_through() {
        let err = VnicError::native("SIOCSIFADDR", io::Error::from_raw_os_error(1));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.raw_os_error(), Some(1));
    }

    #[test]
    fn test_closed_handle_maps_to_not_connected() {
        let io_err: io::Error = VnicError::ClosedHandle.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_display_names_the_call() {
        let err = VnicError::native("SIOCSIFMTU", io::Error::from_raw_os_error(22));
        assert!(err.to_string().starts_with("SIOCSIFMTU failed"));

        let err = VnicError::UnsupportedAddressFamily(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert!(err.to_string().contains("::1"));
    }
}
