//! Device configuration
//!
//! Interfaces can be described in a small TOML file:
//!
//! ```toml
//! [interface]
//! name = "vnic0"
//! address = "10.0.0.1/24"
//! broadcast = "10.0.0.255"
//! mtu = 1420
//!
//! [log]
//! level = "info"
//! format = "compact"
//! ```

use crate::address::{mask_to_prefix, prefix_to_mask, AddressConfig};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interface configuration
    pub interface: InterfaceConfig,

    /// Logging settings (optional)
    #[serde(default)]
    pub log: LogConfig,
}

/// Interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Requested interface name (optional, default "vnic0").
    ///
    /// An empty name or a `%d` template lets the kernel number the device on Linux.
    #[serde(default = "default_interface_name")]
    pub name: String,

    /// Interface address, either plain ("10.0.0.1") or CIDR ("10.0.0.1/24")
    pub address: String,

    /// Netmask, required unless `address` carries a prefix length
    #[serde(default)]
    pub netmask: Option<String>,

    /// Broadcast address (optional)
    #[serde(default)]
    pub broadcast: Option<String>,

    /// MTU (optional, left to the OS when unset)
    #[serde(default)]
    pub mtu: Option<u32>,
}

fn default_interface_name() -> String {
    crate::DEFAULT_DEVICE_NAME.to_string()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.interface.validate()
    }
}

impl InterfaceConfig {
    /// Validate the interface section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mtu) = self.mtu {
            if mtu == 0 {
                return Err(ConfigError::ValidationError("mtu must be non-zero".into()));
            }
        }
        self.address_config().map(|_| ())
    }

    /// Resolve the address, netmask and broadcast strings into an [`AddressConfig`].
    pub fn address_config(&self) -> Result<AddressConfig, ConfigError> {
        let (ip, prefix) = match self.address.split_once('/') {
            Some((ip, prefix)) => {
                let prefix: u8 = prefix.parse().map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "invalid prefix length in address '{}'",
                        self.address
                    ))
                })?;
                (parse_v4(ip, "address")?, Some(prefix))
            }
            None => (parse_v4(&self.address, "address")?, None),
        };

        let netmask = match (&self.netmask, prefix) {
            (Some(mask), None) => {
                let mask = parse_v4(mask, "netmask")?;
                if mask_to_prefix(mask).is_none() {
                    return Err(ConfigError::ValidationError(format!(
                        "netmask {} is not contiguous",
                        mask
                    )));
                }
                mask
            }
            (None, Some(prefix)) => prefix_to_mask(prefix).ok_or_else(|| {
                ConfigError::ValidationError(format!("invalid IPv4 prefix length: {}", prefix))
            })?,
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "netmask given both as prefix and as netmask".into(),
                ))
            }
            (None, None) => return Err(ConfigError::MissingField("interface.netmask".into())),
        };

        let broadcast = self
            .broadcast
            .as_deref()
            .map(|b| parse_v4(b, "broadcast"))
            .transpose()?;

        Ok(AddressConfig::v4(ip, broadcast, netmask))
    }
}

fn parse_v4(s: &str, field: &str) -> Result<Ipv4Addr, ConfigError> {
    let addr: IpAddr = s.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{} '{}' is not an IP address", field, s))
    })?;
    match addr {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(ConfigError::ValidationError(format!(
            "{} '{}' is IPv6; only IPv4 is supported",
            field, s
        ))),
    }
}
