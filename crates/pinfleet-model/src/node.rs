//! Fleet nodes: the microcontrollers that carry assignments.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node identifier.
pub type NodeId = i64;

/// Microcontroller platform a node runs on.
///
/// The platform decides the GPIO map used for pin validation and the
/// headers emitted into synthesized firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Esp32,
    Esp32C3,
    Esp8266,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Esp32 => "esp32",
            Platform::Esp32C3 => "esp32c3",
            Platform::Esp8266 => "esp8266",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health state of a node as seen by the broker.
///
/// `Maintenance` is operator-pinned: the health sweep never moves a node
/// out of it based on heartbeats alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Online,
    Offline,
    Error,
    Maintenance,
}

impl NodeHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeHealth::Online => "online",
            NodeHealth::Offline => "offline",
            NodeHealth::Error => "error",
            NodeHealth::Maintenance => "maintenance",
        }
    }

    /// Whether the health sweep may overwrite this state.
    pub fn is_sweepable(&self) -> bool {
        !matches!(self, NodeHealth::Maintenance)
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a node reaches the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkMode {
    /// Station-mode WiFi, the common case.
    Wifi {
        ssid: String,
        #[serde(default)]
        channel: Option<u8>,
    },
    /// ESP-NOW style peer link without an access point.
    PointToPoint { channel: u8 },
    /// Long-range sub-GHz radio bridge.
    LongRange { frequency_mhz: u32, tx_power_dbm: i8 },
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Wifi {
            ssid: String::new(),
            channel: None,
        }
    }
}

/// A registered fleet node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub platform: Platform,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Version string baked into the last synthesized firmware.
    #[serde(default)]
    pub firmware_version: Option<String>,
    pub health: NodeHealth,
    /// Unix millis of the last heartbeat, if any.
    #[serde(default)]
    pub last_heartbeat: Option<i64>,
    #[serde(default)]
    pub network: NetworkMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// True when the last heartbeat is older than `threshold_ms`, or missing.
    pub fn heartbeat_stale(&self, now_ms: i64, threshold_ms: i64) -> bool {
        match self.last_heartbeat {
            Some(ts) => now_ms.saturating_sub(ts) > threshold_ms,
            None => true,
        }
    }
}

/// Payload for registering a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub platform: Platform,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub network: NetworkMode,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            platform,
            mac_address: None,
            ip_address: None,
            location: None,
            firmware_version: None,
            network: NetworkMode::default(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    pub fn with_network(mut self, network: NetworkMode) -> Self {
        self.network = network;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_lowercase() {
        let json = serde_json::to_string(&NodeHealth::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");
        assert_eq!(NodeHealth::Error.to_string(), "error");
    }

    #[test]
    fn maintenance_is_not_sweepable() {
        assert!(NodeHealth::Online.is_sweepable());
        assert!(!NodeHealth::Maintenance.is_sweepable());
    }

    #[test]
    fn heartbeat_staleness() {
        let spec = NodeSpec::new("Kitchen", Platform::Esp32).with_location("kitchen");
        let node = Node {
            id: 1,
            name: spec.name,
            platform: spec.platform,
            mac_address: None,
            ip_address: None,
            location: spec.location,
            firmware_version: None,
            health: NodeHealth::Online,
            last_heartbeat: Some(1_000),
            network: NetworkMode::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!node.heartbeat_stale(5_000, 10_000));
        assert!(node.heartbeat_stale(20_000, 10_000));

        let silent = Node {
            last_heartbeat: None,
            ..node
        };
        assert!(silent.heartbeat_stale(5_000, 10_000));
    }

    #[test]
    fn network_mode_tagged_json() {
        let mode = NetworkMode::Wifi {
            ssid: "lab".to_string(),
            channel: Some(6),
        };
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["mode"], "wifi");
        assert_eq!(json["ssid"], "lab");
    }
}
