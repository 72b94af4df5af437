//! Capability catalog: reusable sensor/actuator definitions and the
//! assignments binding them to a node and GPIO pin.
//!
//! Definitions describe a device model once (electrical envelope, protocol,
//! timing); assignments are physically installed units. An assignment's
//! definition reference is immutable after creation, and both kinds of row
//! are retired rather than deleted so telemetry history keeps its joins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric id of a catalog definition.
pub type DefinitionId = i64;
/// Numeric id of an installed assignment. Readings route back by this id.
pub type AssignmentId = i64;

/// What a sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Temperature,
    Humidity,
    Light,
    Distance,
    Motion,
    Pressure,
    Gas,
}

impl std::fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Light => "light",
            Self::Distance => "distance",
            Self::Motion => "motion",
            Self::Pressure => "pressure",
            Self::Gas => "gas",
        };
        write!(f, "{s}")
    }
}

/// What an actuator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorCategory {
    Relay,
    Dimmer,
    Motor,
    Servo,
    Valve,
    Buzzer,
}

impl std::fmt::Display for ActuatorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Relay => "relay",
            Self::Dimmer => "dimmer",
            Self::Motor => "motor",
            Self::Servo => "servo",
            Self::Valve => "valve",
            Self::Buzzer => "buzzer",
        };
        write!(f, "{s}")
    }
}

/// Electrical communication protocol of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Digital,
    Analog,
    OneWire,
    I2c,
    Spi,
    Uart,
    Pwm,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Digital => "digital",
            Self::Analog => "analog",
            Self::OneWire => "onewire",
            Self::I2c => "i2c",
            Self::Spi => "spi",
            Self::Uart => "uart",
            Self::Pwm => "pwm",
        };
        write!(f, "{s}")
    }
}

/// Pin class a definition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    #[default]
    Digital,
    Analog,
}

/// How many pins a peripheral occupies and of which kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRequirement {
    pub count: u8,
    pub kind: PinKind,
}

impl Default for PinRequirement {
    fn default() -> Self {
        Self {
            count: 1,
            kind: PinKind::Digital,
        }
    }
}

/// Supply voltage range and drive ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ElectricalEnvelope {
    pub voltage_min: Option<f64>,
    pub voltage_max: Option<f64>,
    /// Maximum drive current in amperes (actuators).
    pub current_max: Option<f64>,
    /// Maximum drive power in watts (actuators).
    pub power_max: Option<f64>,
}

/// Two-state lifecycle replacing the boolean soft-delete flag.
///
/// Retired rows stay in the store so historical telemetry keeps resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Active,
    Retired,
}

impl Lifecycle {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Which side of the catalog an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Sensor,
    Actuator,
}

/// Reusable technical description of a sensor model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDefinition {
    pub id: DefinitionId,
    pub name: String,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub category: SensorCategory,
    pub protocol: Protocol,
    pub electrical: ElectricalEnvelope,
    pub pins: PinRequirement,
    pub unit: Option<String>,
    pub range_min: Option<f64>,
    pub range_max: Option<f64>,
    pub precision: Option<f64>,
    /// Hint for the shared sampling cadence of generated firmware.
    pub read_latency_ms: Option<u64>,
    pub default_calibration: serde_json::Value,
    pub default_config: serde_json::Value,
    pub datasheet_url: Option<String>,
    pub notes: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reusable technical description of an actuator model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorDefinition {
    pub id: DefinitionId,
    pub name: String,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub category: ActuatorCategory,
    pub protocol: Protocol,
    pub electrical: ElectricalEnvelope,
    pub pins: PinRequirement,
    pub control_min: Option<f64>,
    pub control_max: Option<f64>,
    pub response_latency_ms: Option<u64>,
    pub default_config: serde_json::Value,
    pub datasheet_url: Option<String>,
    pub notes: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A physically installed sensor: one definition bound to a node and pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorAssignment {
    pub id: AssignmentId,
    /// Immutable after creation.
    pub definition_id: DefinitionId,
    pub node_id: i64,
    pub pin: u8,
    pub alias: Option<String>,
    pub location: Option<String>,
    /// Per-installation override of the definition's calibration blob.
    pub calibration: serde_json::Value,
    pub config: serde_json::Value,
    pub installed_at: Option<DateTime<Utc>>,
    pub lifecycle: Lifecycle,
    pub last_value_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A physically installed actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorAssignment {
    pub id: AssignmentId,
    /// Immutable after creation.
    pub definition_id: DefinitionId,
    pub node_id: i64,
    pub pin: u8,
    pub alias: Option<String>,
    pub location: Option<String>,
    pub config: serde_json::Value,
    pub current_state: serde_json::Value,
    pub installed_at: Option<DateTime<Utc>>,
    pub lifecycle: Lifecycle,
    pub last_actuated_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SensorAssignment {
    /// Alias if set, otherwise falls back to the definition name.
    pub fn display_name<'a>(&'a self, definition_name: &'a str) -> &'a str {
        self.alias.as_deref().unwrap_or(definition_name)
    }
}

impl ActuatorAssignment {
    pub fn display_name<'a>(&'a self, definition_name: &'a str) -> &'a str {
        self.alias.as_deref().unwrap_or(definition_name)
    }
}

/// Payload for creating or editing a sensor definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDefinitionSpec {
    pub name: String,
    pub category: SensorCategory,
    pub protocol: Protocol,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub electrical: ElectricalEnvelope,
    #[serde(default)]
    pub pins: PinRequirement,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub range_min: Option<f64>,
    #[serde(default)]
    pub range_max: Option<f64>,
    #[serde(default)]
    pub precision: Option<f64>,
    #[serde(default)]
    pub read_latency_ms: Option<u64>,
    #[serde(default)]
    pub default_calibration: Option<serde_json::Value>,
    #[serde(default)]
    pub default_config: Option<serde_json::Value>,
    #[serde(default)]
    pub datasheet_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SensorDefinitionSpec {
    pub fn new(name: impl Into<String>, category: SensorCategory, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            category,
            protocol,
            model: None,
            manufacturer: None,
            electrical: ElectricalEnvelope::default(),
            pins: PinRequirement::default(),
            unit: None,
            range_min: None,
            range_max: None,
            precision: None,
            read_latency_ms: None,
            default_calibration: None,
            default_config: None,
            datasheet_url: None,
            notes: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_read_latency_ms(mut self, latency: u64) -> Self {
        self.read_latency_ms = Some(latency);
        self
    }
}

/// Payload for creating or editing an actuator definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorDefinitionSpec {
    pub name: String,
    pub category: ActuatorCategory,
    pub protocol: Protocol,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub electrical: ElectricalEnvelope,
    #[serde(default)]
    pub pins: PinRequirement,
    #[serde(default)]
    pub control_min: Option<f64>,
    #[serde(default)]
    pub control_max: Option<f64>,
    #[serde(default)]
    pub response_latency_ms: Option<u64>,
    #[serde(default)]
    pub default_config: Option<serde_json::Value>,
    #[serde(default)]
    pub datasheet_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ActuatorDefinitionSpec {
    pub fn new(name: impl Into<String>, category: ActuatorCategory, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            category,
            protocol,
            model: None,
            manufacturer: None,
            electrical: ElectricalEnvelope::default(),
            pins: PinRequirement::default(),
            control_min: None,
            control_max: None,
            response_latency_ms: None,
            default_config: None,
            datasheet_url: None,
            notes: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Request to bind a definition to a node and pin.
///
/// Shared by sensor and actuator creation; the service routes it to the
/// matching catalog side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentSpec {
    pub definition_id: DefinitionId,
    pub node_id: i64,
    pub pin: u8,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub calibration: Option<serde_json::Value>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AssignmentSpec {
    pub fn new(definition_id: DefinitionId, node_id: i64, pin: u8) -> Self {
        Self {
            definition_id,
            node_id,
            pin,
            alias: None,
            location: None,
            calibration: None,
            config: None,
            installed_at: None,
            notes: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// In-place update of an assignment. `None` fields are left untouched;
/// the definition reference can never change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentChanges {
    pub pin: Option<u8>,
    pub alias: Option<String>,
    pub location: Option<String>,
    pub calibration: Option<serde_json::Value>,
    pub config: Option<serde_json::Value>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&SensorCategory::Temperature).unwrap(),
            "\"temperature\""
        );
        assert_eq!(
            serde_json::to_string(&Protocol::OneWire).unwrap(),
            "\"onewire\""
        );
        assert_eq!(SensorCategory::Light.to_string(), "light");
    }

    #[test]
    fn lifecycle_defaults_active() {
        assert!(Lifecycle::default().is_active());
        assert!(!Lifecycle::Retired.is_active());
    }

    #[test]
    fn assignment_spec_builder() {
        let spec = AssignmentSpec::new(1, 2, 4)
            .with_alias("Fridge probe")
            .with_location("kitchen");
        assert_eq!(spec.pin, 4);
        assert_eq!(spec.alias.as_deref(), Some("Fridge probe"));
        assert_eq!(spec.location.as_deref(), Some("kitchen"));
    }
}
