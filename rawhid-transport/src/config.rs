//! Transport configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{timing, DEFAULT_REGISTRY_CAPACITY, MAX_PACKET};

/// Tunables for a [`RawHid`](crate::RawHid) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Number of distinct (vendor, product) filter pairs that can be opened
    pub registry_capacity: usize,
    /// Largest accepted payload; values above the staging size are clamped
    pub max_packet: usize,
    /// Poll slice used by the hidapi backend while a read is pending (ms)
    pub poll_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            max_packet: MAX_PACKET,
            poll_interval_ms: timing::POLL_INTERVAL_MS,
        }
    }
}

impl TransportConfig {
    /// Effective payload limit
    pub fn packet_limit(&self) -> usize {
        self.max_packet.min(MAX_PACKET)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.registry_capacity, 10);
        assert_eq!(config.packet_limit(), 512);
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TransportConfig = toml::from_str("max_packet = 64").unwrap();
        assert_eq!(config.packet_limit(), 64);
        assert_eq!(config.registry_capacity, 10);
    }

    #[test]
    fn test_oversized_packet_limit_is_clamped() {
        let config = TransportConfig {
            max_packet: 4096,
            ..Default::default()
        };
        assert_eq!(config.packet_limit(), MAX_PACKET);
    }

    #[test]
    fn test_zero_poll_interval_is_raised() {
        let config: TransportConfig = serde_json::from_str(r#"{"poll_interval_ms":0}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
