//! TAP-Windows driver interface: control codes, request layouts and the device file

use crate::address::AddressConfig;
use std::io;
use std::mem;
use std::ptr;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_IO_PENDING, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_ATTRIBUTE_SYSTEM, FILE_FLAG_OVERLAPPED, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{DeviceIoControl, GetOverlappedResult, OVERLAPPED};

const FILE_DEVICE_UNKNOWN: u32 = 0x22;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

/// Equivalent of the `CTL_CODE` macro
pub(crate) const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

pub(crate) const TAP_WIN_IOCTL_SET_MEDIA_STATUS: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 6, METHOD_BUFFERED, FILE_ANY_ACCESS);
pub(crate) const TAP_WIN_IOCTL_CONFIG_TUN: u32 =
    ctl_code(FILE_DEVICE_UNKNOWN, 10, METHOD_BUFFERED, FILE_ANY_ACCESS);

/// SET_MEDIA_STATUS input: a little-endian `ULONG`, 1 = connected
pub(crate) const MEDIA_STATUS_CONNECTED: [u8; 4] = 1u32.to_le_bytes();

/// Kernel object path of the adapter's device file
pub(crate) fn device_path(guid: &str) -> String {
    format!(r"\\.\Global\{}.tap", guid)
}

/// CONFIG_TUN input block.
///
/// | offset | field          |
/// |--------|----------------|
/// | 0      | local address  |
/// | 4      | remote network (`ip & netmask`) |
/// | 8      | remote netmask |
///
/// Each field is an IPv4 address in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TunConfigBlock([u8; 12]);

impl TunConfigBlock {
    pub fn new(config: &AddressConfig) -> Self {
        let mut block = [0u8; 12];
        block[0..4].copy_from_slice(&config.ip().octets());
        block[4..8].copy_from_slice(&config.network().octets());
        block[8..12].copy_from_slice(&config.netmask().octets());
        Self(block)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Event handle used for one overlapped request, closed on drop
struct Event(HANDLE);

impl Event {
    fn new() -> io::Result<Self> {
        // SAFETY: unnamed manual-reset event with default security.
        let handle = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: handle came from CreateEventW and is closed once.
        unsafe { CloseHandle(self.0) };
    }
}

/// TAP device file opened for exclusive overlapped access
pub(crate) struct DeviceFile(HANDLE);

impl DeviceFile {
    pub fn open(path: &str) -> io::Result<Self> {
        let wide = super::registry::to_wide(path);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_SYSTEM | FILE_FLAG_OVERLAPPED,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }

    /// Submit a buffered device-control request with no output buffer.
    pub fn ioctl(&self, code: u32, input: &[u8]) -> io::Result<()> {
        let len = clamp_len(input.len());
        self.overlapped(|ov| {
            // SAFETY: `input` is valid for `len` bytes until the request completes.
            unsafe {
                DeviceIoControl(
                    self.0,
                    code,
                    input.as_ptr() as _,
                    len,
                    ptr::null_mut(),
                    0,
                    ptr::null_mut(),
                    ov,
                )
            }
        })?;
        Ok(())
    }

    /// Read one frame, blocking until the driver completes the request.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = clamp_len(buf.len());
        self.overlapped(|ov| {
            // SAFETY: `buf` is valid for `len` bytes until the request completes.
            unsafe { ReadFile(self.0, buf.as_mut_ptr() as _, len, ptr::null_mut(), ov) }
        })
    }

    /// Write one frame, blocking until the driver completes the request.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let len = clamp_len(buf.len());
        self.overlapped(|ov| {
            // SAFETY: `buf` is valid for `len` bytes until the request completes.
            unsafe { WriteFile(self.0, buf.as_ptr() as _, len, ptr::null_mut(), ov) }
        })
    }

    /// Start a request on this handle and wait for it to finish.
    ///
    /// The handle is overlapped, so every request carries an OVERLAPPED and the
    /// transfer count is always taken from GetOverlappedResult, whether the request
    /// completed inline or went pending.
    fn overlapped<F>(&self, start: F) -> io::Result<usize>
    where
        F: FnOnce(*mut OVERLAPPED) -> i32,
    {
        let event = Event::new()?;
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut ov: OVERLAPPED = unsafe { mem::zeroed() };
        ov.hEvent = event.0;

        if start(&mut ov as *mut OVERLAPPED) == 0 {
            // SAFETY: no intervening calls since the failed request.
            let err = unsafe { GetLastError() };
            if err != ERROR_IO_PENDING {
                return Err(io::Error::from_raw_os_error(err as i32));
            }
        }

        let mut transferred = 0u32;
        // `ov` stays pinned on this frame until the wait returns
        // SAFETY: `ov` belongs to the request just started on this handle.
        if unsafe { GetOverlappedResult(self.0, &ov, &mut transferred, 1) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(transferred as usize)
    }

    /// Close the handle, reporting any error from CloseHandle
    pub fn close(self) -> io::Result<()> {
        let handle = self.0;
        mem::forget(self);
        // SAFETY: ownership was released by `forget`; the handle is closed once.
        if unsafe { CloseHandle(handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for DeviceFile {
    fn drop(&mut self) {
        // SAFETY: handle came from CreateFileW and is closed once.
        unsafe { CloseHandle(self.0) };
    }
}

fn clamp_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
