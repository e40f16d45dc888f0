//! Command handlers for the CLI application.
//!
//! - `utility`: interface listing
//! - `packet`: open, recv, send and echo against one target device

pub mod packet;
pub mod utility;

use anyhow::{bail, Context};
use rawhid_transport::{DeviceFilter, MockPlatform, RawHid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::TargetArgs;
use crate::config::CliConfig;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Device selection after applying command-line flags over the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub filter: DeviceFilter,
    pub index: usize,
    pub timeout: Duration,
}

impl Target {
    pub fn resolve(config: &CliConfig, args: &TargetArgs) -> Self {
        let mut filter = config.filter;
        if let Some(vid) = args.vid {
            filter.vendor_id = vid;
        }
        if let Some(pid) = args.pid {
            filter.product_id = pid;
        }
        if let Some(page) = args.usage_page {
            filter.usage_page = page;
        }
        if let Some(usage) = args.usage {
            filter.usage = usage;
        }
        Self {
            filter,
            index: args.index,
            timeout: Duration::from_millis(args.timeout_ms.unwrap_or(config.timeout_ms)),
        }
    }

    pub fn vendor_id(&self) -> i32 {
        self.filter.vendor_id
    }

    pub fn product_id(&self) -> i32 {
        self.filter.product_id
    }
}

/// Build the packet API over real hardware or the loopback mock
pub fn connect(config: &CliConfig, mock: bool) -> anyhow::Result<RawHid> {
    if mock {
        info!("Using in-memory loopback device");
        let platform = Arc::new(MockPlatform::loopback());
        return Ok(RawHid::with_platform_and_config(
            platform,
            config.transport.clone(),
        ));
    }
    RawHid::with_config(config.transport.clone()).context("Failed to initialize HID access")
}

/// Open the target's filter, making sure its index is among the opened devices
pub fn open_target(hid: &RawHid, target: &Target) -> anyhow::Result<usize> {
    let count = hid.open(target.index + 1, &target.filter)?;
    if count == 0 {
        bail!("No device found matching {}", describe_filter(&target.filter));
    }
    if count <= target.index {
        bail!(
            "Device index {} requested but only {} device(s) match {}",
            target.index,
            count,
            describe_filter(&target.filter)
        );
    }
    Ok(count)
}

/// Human-readable form of a filter, `*` for wildcard fields
pub fn describe_filter(filter: &DeviceFilter) -> String {
    fn field(value: i32) -> String {
        if value > 0 {
            format!("{:04X}", value)
        } else {
            "*".to_string()
        }
    }
    format!(
        "{}:{} (usage {}:{})",
        field(filter.vendor_id),
        field(filter.product_id),
        field(filter.usage_page),
        field(filter.usage)
    )
}

/// Flag raised once the user presses Ctrl-C
///
/// Only the first call in a process installs a handler; later calls get a
/// flag that is never raised.
pub fn stop_on_interrupt() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!("Ctrl-C handler not installed: {e}");
    }
    stop
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = CliConfig::default();
        let args = TargetArgs {
            pid: Some(-1),
            usage: Some(0),
            index: 3,
            timeout_ms: Some(5),
            ..Default::default()
        };
        let target = Target::resolve(&config, &args);
        assert_eq!(target.vendor_id(), 0x16C0);
        assert_eq!(target.product_id(), -1);
        assert_eq!(target.filter.usage_page, 0xFFAB);
        assert_eq!(target.filter.usage, 0);
        assert_eq!(target.index, 3);
        assert_eq!(target.timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_timeout_falls_back_to_config() {
        let config = CliConfig {
            timeout_ms: 750,
            ..Default::default()
        };
        let target = Target::resolve(&config, &TargetArgs::default());
        assert_eq!(target.timeout, Duration::from_millis(750));
        assert_eq!(target.filter, config.filter);
    }

    #[test]
    fn test_describe_filter() {
        let filter = DeviceFilter::new(0x16C0, -1).with_usage(0xFFAB, 0);
        assert_eq!(describe_filter(&filter), "16C0:* (usage FFAB:*)");
    }

    #[test]
    fn test_open_target_checks_index() {
        let config = CliConfig::default();
        let hid = connect(&config, true).unwrap();
        let mut target = Target::resolve(&config, &TargetArgs::default());
        assert_eq!(open_target(&hid, &target).unwrap(), 1);

        target.index = 1;
        let err = open_target(&hid, &target).unwrap_err();
        assert!(err.to_string().contains("only 1 device"));

        target.index = 0;
        target.filter.vendor_id = 0x1234;
        let err = open_target(&hid, &target).unwrap_err();
        assert!(err.to_string().contains("No device found"));
    }
}
