//! Read-only registry lookups for the installed TAP adapter

use crate::error::{VnicError, VnicResult};
use std::io;
use std::ptr;
use windows_sys::Win32::Foundation::{ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE,
    KEY_ENUMERATE_SUB_KEYS, KEY_QUERY_VALUE, KEY_READ, REG_EXPAND_SZ, REG_SAM_FLAGS, REG_SZ,
};

/// Network adapter device class
pub(crate) const ADAPTER_CLASS_KEY: &str =
    r"SYSTEM\CurrentControlSet\Control\Class\{4D36E972-E325-11CE-BFC1-08002BE10318}";

/// Per-adapter connection settings, keyed by adapter GUID
pub(crate) const NETWORK_CONNECTIONS_KEY: &str =
    r"SYSTEM\CurrentControlSet\Control\Network\{4D36E972-E325-11CE-BFC1-08002BE10318}";

/// Driver component ids of the TAP-Windows adapter
pub(crate) const TAP_COMPONENT_IDS: &[&str] = &["tap0901", r"root\tap0901"];

// Longest registry key name, in UTF-16 units
const MAX_KEY_LENGTH: usize = 255;

/// Open registry key, closed on drop
struct RegKey(HKEY);

impl RegKey {
    fn open(parent: HKEY, path: &str, access: REG_SAM_FLAGS) -> io::Result<Self> {
        let wide = to_wide(path);
        let mut key: HKEY = 0;
        // SAFETY: `wide` is NUL-terminated and outlives the call; `key` is a valid out pointer.
        let status = unsafe { RegOpenKeyExW(parent, wide.as_ptr(), 0, access, &mut key) };
        if status != ERROR_SUCCESS {
            return Err(io::Error::from_raw_os_error(status as i32));
        }
        Ok(Self(key))
    }

    fn local_machine(path: &str, access: REG_SAM_FLAGS) -> io::Result<Self> {
        Self::open(HKEY_LOCAL_MACHINE, path, access)
    }

    fn subkey(&self, name: &str, access: REG_SAM_FLAGS) -> io::Result<Self> {
        Self::open(self.0, name, access)
    }

    fn subkey_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut buf = [0u16; MAX_KEY_LENGTH + 1];
        for index in 0.. {
            let mut len = buf.len() as u32;
            // SAFETY: `buf` holds `len` UTF-16 units; optional out parameters are null.
            let status = unsafe {
                RegEnumKeyExW(
                    self.0,
                    index,
                    buf.as_mut_ptr(),
                    &mut len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            match status {
                ERROR_SUCCESS => names.push(String::from_utf16_lossy(&buf[..len as usize])),
                ERROR_NO_MORE_ITEMS => break,
                err => return Err(io::Error::from_raw_os_error(err as i32)),
            }
        }
        Ok(names)
    }

    fn string_value(&self, name: &str) -> io::Result<String> {
        let wide = to_wide(name);
        let mut kind = 0;
        let mut size = 0u32;
        // SAFETY: size query only; the data pointer is null.
        let status = unsafe {
            RegQueryValueExW(
                self.0,
                wide.as_ptr(),
                ptr::null(),
                &mut kind,
                ptr::null_mut(),
                &mut size,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(io::Error::from_raw_os_error(status as i32));
        }
        if kind != REG_SZ && kind != REG_EXPAND_SZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("registry value {} is not a string", name),
            ));
        }

        let mut data = vec![0u16; (size as usize + 1) / 2];
        let mut size = (data.len() * 2) as u32;
        // SAFETY: `data` is `size` bytes long and suitably aligned for UTF-16.
        let status = unsafe {
            RegQueryValueExW(
                self.0,
                wide.as_ptr(),
                ptr::null(),
                &mut kind,
                data.as_mut_ptr() as *mut u8,
                &mut size,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(io::Error::from_raw_os_error(status as i32));
        }
        data.truncate(size as usize / 2);
        Ok(decode_reg_sz(&data))
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        // SAFETY: the key was opened by RegOpenKeyExW and is closed exactly once.
        unsafe { RegCloseKey(self.0) };
    }
}

pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Decode a REG_SZ payload, dropping the terminator(s)
fn decode_reg_sz(data: &[u16]) -> String {
    let end = data.iter().position(|&c| c == 0).unwrap_or(data.len());
    String::from_utf16_lossy(&data[..end])
}

fn is_tap_component(id: &str) -> bool {
    TAP_COMPONENT_IDS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(id.trim()))
}

/// Find the GUID (`NetCfgInstanceId`) of the first installed TAP adapter.
pub(crate) fn find_adapter_guid() -> VnicResult<String> {
    let class = RegKey::local_machine(ADAPTER_CLASS_KEY, KEY_READ | KEY_ENUMERATE_SUB_KEYS)
        .map_err(|e| VnicError::unavailable(ADAPTER_CLASS_KEY, e))?;
    let names = class
        .subkey_names()
        .map_err(|e| VnicError::native("RegEnumKeyExW", e))?;

    for name in names {
        // Entries such as "Properties" are not readable; skip them
        let Ok(adapter) = class.subkey(&name, KEY_READ | KEY_QUERY_VALUE) else {
            continue;
        };
        let Ok(component) = adapter.string_value("ComponentId") else {
            continue;
        };
        if !is_tap_component(&component) {
            continue;
        }
        match adapter.string_value("NetCfgInstanceId") {
            Ok(guid) => {
                tracing::debug!("Found TAP adapter {} ({}) at class entry {}", guid, component, name);
                return Ok(guid);
            }
            Err(e) => {
                tracing::debug!("TAP class entry {} has no NetCfgInstanceId: {}", name, e);
            }
        }
    }

    Err(VnicError::unavailable(
        "TAP adapter",
        io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "no adapter with component id {} found in registry",
                TAP_COMPONENT_IDS.join(" or ")
            ),
        ),
    ))
}

/// Human-readable connection name of the adapter (e.g. "Ethernet 2")
pub(crate) fn connection_name(guid: &str) -> VnicResult<String> {
    let path = format!(r"{}\{}\Connection", NETWORK_CONNECTIONS_KEY, guid);
    RegKey::local_machine(&path, KEY_READ | KEY_QUERY_VALUE)
        .and_then(|key| key.string_value("Name"))
        .map_err(|e| VnicError::unavailable(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_id_matching() {
        assert!(is_tap_component("tap0901"));
        assert!(is_tap_component("ROOT\\TAP0901"));
        assert!(!is_tap_component("wintun"));
        assert!(!is_tap_component("tap0801"));
    }

    #[test]
    fn test_decode_reg_sz() {
        let mut data: Vec<u16> = "Ethernet 2".encode_utf16().collect();
        data.extend([0, 0]);
        assert_eq!(decode_reg_sz(&data), "Ethernet 2");
        assert_eq!(to_wide("ab"), vec![b'a' as u16, b'b' as u16, 0]);
    }

    #[test]
    fn test_unknown_adapter_connection_is_unavailable() {
        let err = connection_name("{00000000-0000-0000-0000-000000000000}").unwrap_err();
        match err {
            VnicError::ResourceUnavailable { resource, source } => {
                assert!(resource.ends_with(r"{00000000-0000-0000-0000-000000000000}\Connection"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_class_key_is_readable() {
        // The network adapter class exists on every Windows installation
        let key = RegKey::local_machine(ADAPTER_CLASS_KEY, KEY_READ | KEY_ENUMERATE_SUB_KEYS);
        assert!(key.is_ok());
    }
}
