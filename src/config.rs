//! Configuration file for the CLI
//!
//! Holds the device filter and timeout used when no flags are given, plus the
//! transport tunables. Missing fields take their defaults.

use rawhid_transport::protocol::teensy;
use rawhid_transport::{DeviceFilter, TransportConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Timeout used when neither the file nor the command line sets one
pub const DEFAULT_TIMEOUT_MS: u64 = 220;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Devices to talk to
    pub filter: DeviceFilter,
    /// Transfer timeout in milliseconds
    pub timeout_ms: u64,
    pub transport: TransportConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            // Teensy running the RawHID example sketch
            filter: DeviceFilter::new(teensy::VENDOR_ID.into(), teensy::PRODUCT_ID.into())
                .with_usage(teensy::USAGE_PAGE.into(), teensy::USAGE.into()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            transport: TransportConfig::default(),
        }
    }
}

impl CliConfig {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rawhid")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: CliConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
