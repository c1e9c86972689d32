//! Windows TAP implementation
//!
//! Drives an installed TAP-Windows adapter (component id `tap0901`). The adapter is
//! located through the registry, its device file is opened for overlapped I/O, and
//! address configuration goes through DeviceIoControl. The MTU is set with `netsh`.

mod registry;
mod tap;

use crate::address::AddressConfig;
use crate::device::{ReadyGate, TunDevice};
use crate::error::{VnicError, VnicResult};
use std::process::Command;
use tap::{
    DeviceFile, TunConfigBlock, MEDIA_STATUS_CONNECTED, TAP_WIN_IOCTL_CONFIG_TUN,
    TAP_WIN_IOCTL_SET_MEDIA_STATUS,
};

/// Windows TAP device
pub struct WindowsTap {
    name: String,
    guid: String,
    file: Option<DeviceFile>,
    gate: ReadyGate,
    mtu: Option<u32>,
}

impl WindowsTap {
    /// Open the first installed TAP adapter.
    ///
    /// The requested name is not used to select an adapter; the device takes the
    /// adapter's connection name (e.g. "Ethernet 2").
    pub fn create(name: &str) -> VnicResult<Self> {
        let guid = registry::find_adapter_guid()?;
        let connection = registry::connection_name(&guid)?;

        let path = tap::device_path(&guid);
        let file = DeviceFile::open(&path).map_err(|e| VnicError::unavailable(&path, e))?;

        if !name.is_empty() && name != connection {
            tracing::warn!(
                "Requested adapter name '{}' ignored, using TAP connection '{}'",
                name,
                connection
            );
        }
        tracing::info!("Opened TAP adapter: {} ({})", connection, guid);

        Ok(Self {
            name: connection,
            guid,
            file: Some(file),
            gate: ReadyGate::default(),
            mtu: None,
        })
    }

    /// Adapter GUID (`NetCfgInstanceId`)
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// True once an address has been applied and the media reported connected
    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    fn file(&self) -> VnicResult<&DeviceFile> {
        self.file.as_ref().ok_or(VnicError::ClosedHandle)
    }

    fn ready_file(&self) -> VnicResult<&DeviceFile> {
        let file = self.file()?;
        self.gate.check()?;
        Ok(file)
    }
}

impl TunDevice for WindowsTap {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_address(&mut self, config: &AddressConfig) -> VnicResult<()> {
        let file = self.file()?;

        let block = TunConfigBlock::new(config);
        file.ioctl(TAP_WIN_IOCTL_CONFIG_TUN, block.as_bytes())
            .map_err(|e| VnicError::native("TAP_WIN_IOCTL_CONFIG_TUN", e))?;
        file.ioctl(TAP_WIN_IOCTL_SET_MEDIA_STATUS, &MEDIA_STATUS_CONNECTED)
            .map_err(|e| VnicError::native("TAP_WIN_IOCTL_SET_MEDIA_STATUS", e))?;

        if let Some(broadcast) = config.broadcast() {
            // CONFIG_TUN has no broadcast field
            tracing::debug!("{}: broadcast {} not applied by TAP driver", self.name, broadcast);
        }
        self.gate.open();
        tracing::info!(
            "{}: address {} netmask {}, media connected",
            self.name,
            config.ip(),
            config.netmask()
        );
        Ok(())
    }

    fn set_mtu(&mut self, mtu: u32) -> VnicResult<()> {
        self.file()?;
        if mtu == 0 {
            return Err(VnicError::InvalidMtu(mtu));
        }

        let args = netsh_mtu_args(&self.name, mtu);
        let output = Command::new("netsh")
            .args(&args)
            .output()
            .map_err(|e| VnicError::native("netsh", e))?;
        if !output.status.success() {
            return Err(VnicError::ExternalCommand {
                command: format!("netsh {}", args.join(" ")),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        self.mtu = Some(mtu);
        tracing::info!("{}: mtu {}", self.name, mtu);
        Ok(())
    }

    fn mtu(&self) -> Option<u32> {
        self.mtu
    }

    fn read(&self, buf: &mut [u8]) -> VnicResult<usize> {
        self.ready_file()?
            .read(buf)
            .map_err(|e| VnicError::native("ReadFile", e))
    }

    fn write(&self, buf: &[u8]) -> VnicResult<usize> {
        self.ready_file()?
            .write(buf)
            .map_err(|e| VnicError::native("WriteFile", e))
    }

    fn close(&mut self) -> VnicResult<()> {
        let file = self.file.take().ok_or(VnicError::ClosedHandle)?;
        self.gate.close();
        tracing::debug!("Closing TAP adapter: {}", self.name);
        file.close().map_err(|e| VnicError::native("CloseHandle", e))
    }
}

impl Drop for WindowsTap {
    fn drop(&mut self) {
        if self.file.is_some() {
            tracing::debug!("Dropping open TAP adapter: {}", self.name);
        }
    }
}

impl std::fmt::Debug for WindowsTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsTap")
            .field("name", &self.name)
            .field("guid", &self.guid)
            .field("ready", &self.gate.is_open())
            .field("mtu", &self.mtu)
            .field("closed", &self.file.is_none())
            .finish()
    }
}

/// Arguments for `netsh` to set the IPv4 MTU of a connection, persisted across reboots
fn netsh_mtu_args(connection: &str, mtu: u32) -> Vec<String> {
    vec![
        "interface".into(),
        "ipv4".into(),
        "set".into(),
        "subinterface".into(),
        connection.to_string(),
        format!("mtu={}", mtu),
        "store=persistent".into(),
    ]
}
