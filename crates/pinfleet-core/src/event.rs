//! Fleet events published on the event bus.
//!
//! Events carry numeric entity ids and unix timestamps; health states travel
//! as plain strings so observers never need the model crate to decode them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event flowing through the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A sensor reading republished to subscribers of an assignment.
    SensorReading {
        /// The sensor assignment the reading belongs to.
        assignment_id: i64,
        value: f64,
        unit: Option<String>,
        timestamp: i64,
    },
    /// A node transitioned between health states.
    NodeHealthChanged {
        node_id: i64,
        node_name: String,
        previous: String,
        current: String,
        timestamp: i64,
    },
    /// Result of an actuator command, delivered to the requester.
    ActuatorCommandResult {
        actuator_id: i64,
        command: serde_json::Value,
        status: String,
        timestamp: i64,
    },
    /// Actuator state change broadcast to every other observer.
    ActuatorStateChanged {
        actuator_id: i64,
        command: serde_json::Value,
        timestamp: i64,
    },
}

impl FleetEvent {
    /// Short name of the event variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SensorReading { .. } => "SensorReading",
            Self::NodeHealthChanged { .. } => "NodeHealthChanged",
            Self::ActuatorCommandResult { .. } => "ActuatorCommandResult",
            Self::ActuatorStateChanged { .. } => "ActuatorStateChanged",
        }
    }

    pub fn is_sensor_reading(&self) -> bool {
        matches!(self, Self::SensorReading { .. })
    }

    pub fn is_node_event(&self) -> bool {
        matches!(self, Self::NodeHealthChanged { .. })
    }

    pub fn is_actuator_event(&self) -> bool {
        matches!(
            self,
            Self::ActuatorCommandResult { .. } | Self::ActuatorStateChanged { .. }
        )
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event id.
    pub id: Uuid,
    /// Component that published the event.
    pub source: String,
    /// Publication time (unix seconds).
    pub published_at: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            published_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_match_variants() {
        let event = FleetEvent::SensorReading {
            assignment_id: 7,
            value: 21.5,
            unit: Some("°C".to_string()),
            timestamp: 0,
        };
        assert_eq!(event.type_name(), "SensorReading");
        assert!(event.is_sensor_reading());
        assert!(!event.is_node_event());
    }

    #[test]
    fn events_round_trip_as_json() {
        let event = FleetEvent::NodeHealthChanged {
            node_id: 3,
            node_name: "Kitchen".to_string(),
            previous: "offline".to_string(),
            current: "online".to_string(),
            timestamp: 1700000000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("node_health_changed"));
        let back: FleetEvent = serde_json::from_str(&json).unwrap();
        assert!(back.is_node_event());
    }

    #[test]
    fn metadata_carries_source() {
        let meta = EventMetadata::new("broker");
        assert_eq!(meta.source, "broker");
    }
}
