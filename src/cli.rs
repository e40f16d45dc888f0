// CLI definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rawhid")]
#[command(author, version, about = "Exchange packets with raw USB HID devices")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (default: ~/.config/rawhid/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-memory loopback device instead of real hardware
    #[arg(long, global = true)]
    pub mock: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Device selection flags; unset values fall back to the config file
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Vendor ID (decimal or 0x hex, 0 or negative matches any)
    #[arg(long, global = true, value_parser = parse_int, allow_negative_numbers = true)]
    pub vid: Option<i32>,

    /// Product ID (decimal or 0x hex, 0 or negative matches any)
    #[arg(long, global = true, value_parser = parse_int, allow_negative_numbers = true)]
    pub pid: Option<i32>,

    /// Top-level usage page (0 or negative matches any)
    #[arg(long, global = true, value_parser = parse_int, allow_negative_numbers = true)]
    pub usage_page: Option<i32>,

    /// Top-level usage (0 or negative matches any)
    #[arg(long, global = true, value_parser = parse_int, allow_negative_numbers = true)]
    pub usage: Option<i32>,

    /// Index of the device among those opened
    #[arg(short, long, global = true, default_value_t = 0)]
    pub index: usize,

    /// Transfer timeout in milliseconds
    #[arg(short, long, global = true)]
    pub timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all HID interfaces
    #[command(visible_alias = "ls")]
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Open matching devices and report how many were found
    Open {
        /// Maximum number of devices to open
        #[arg(short = 'n', long, default_value_t = 1)]
        max: usize,
    },

    /// Print received packets until interrupted
    #[command(visible_alias = "monitor")]
    Recv {
        /// Receive buffer size in bytes
        #[arg(short, long, default_value_t = 64)]
        size: usize,
        /// Stop after this many packets
        #[arg(long)]
        count: Option<usize>,
    },

    /// Send one packet
    Send {
        /// Payload bytes in hex (e.g. "01 02 ff" or "0102ff")
        payload: String,
        /// Zero-pad the payload to this size
        #[arg(short, long)]
        size: Option<usize>,
    },

    /// Send packets and check that the device echoes them back
    Echo {
        /// Packet size in bytes
        #[arg(short, long, default_value_t = 64)]
        size: usize,
        /// Number of round trips
        #[arg(short = 'n', long, default_value_t = 1)]
        rounds: usize,
    },
}

/// Parse an integer in decimal or `0x` hex, with an optional sign
pub fn parse_int(s: &str) -> Result<i32, String> {
    let trimmed = s.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|e| format!("invalid number '{trimmed}': {e}"))?;

    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).map_err(|_| format!("'{trimmed}' is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_int_formats() {
        assert_eq!(parse_int("5824"), Ok(5824));
        assert_eq!(parse_int("0x16C0"), Ok(0x16C0));
        assert_eq!(parse_int("0XffAB"), Ok(0xFFAB));
        assert_eq!(parse_int("-1"), Ok(-1));
        assert_eq!(parse_int("-0x10"), Ok(-16));
        assert_eq!(parse_int(" 0 "), Ok(0));
    }

    #[test]
    fn test_parse_int_rejects_garbage() {
        assert!(parse_int("").is_err());
        assert!(parse_int("0x").is_err());
        assert!(parse_int("12ab").is_err());
        assert!(parse_int("0x1_0000_0000").is_err());
        assert!(parse_int("99999999999").is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_filter_flags_accept_hex_and_negative() {
        let cli = Cli::try_parse_from([
            "rawhid", "--vid", "0x16c0", "--pid", "-1", "--usage-page", "0xFFAB", "recv",
        ])
        .unwrap();
        assert_eq!(cli.target.vid, Some(0x16C0));
        assert_eq!(cli.target.pid, Some(-1));
        assert_eq!(cli.target.usage_page, Some(0xFFAB));
        assert_eq!(cli.target.usage, None);
        assert!(matches!(cli.command, Commands::Recv { size: 64, count: None }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["rawhid", "send", "01 02", "--index", "2", "-t", "50", "--mock"])
                .unwrap();
        assert_eq!(cli.target.index, 2);
        assert_eq!(cli.target.timeout_ms, Some(50));
        assert!(cli.mock);
        match cli.command {
            Commands::Send { payload, size } => {
                assert_eq!(payload, "01 02");
                assert_eq!(size, None);
            }
            _ => panic!("expected send"),
        }
    }
}
