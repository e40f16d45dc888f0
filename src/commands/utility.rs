//! Utility command handlers

use super::CommandResult;
use rawhid_transport::RawHid;

/// List all HID interfaces
pub fn list(hid: &RawHid, json: bool) -> CommandResult {
    let interfaces = hid.list_interfaces()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&interfaces)?);
        return Ok(());
    }

    println!("All HID devices ({}):", hid.platform_name());
    for info in &interfaces {
        println!(
            "  VID={:04x} PID={:04x} usage={:04x} page={:04x} if={} path={}",
            info.vendor_id,
            info.product_id,
            info.usage,
            info.usage_page,
            info.interface_number,
            info.path.to_string_lossy(),
        );
        if let Some(name) = &info.product_name {
            println!("      {}", name);
        }
    }
    if interfaces.is_empty() {
        println!("  (none)");
    }
    Ok(())
}
