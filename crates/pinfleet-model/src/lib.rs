//! Device capability model for the fleet.
//!
//! Separates reusable catalog definitions (what a DHT22 *is*) from physical
//! installation bindings (a DHT22 wired to node 3, GPIO 4), validated
//! against per-platform GPIO constraints. Persistence is reached only
//! through the repository ports defined here; implementations are injected.

pub mod catalog;
pub mod error;
pub mod gpio;
pub mod node;
pub mod reading;
pub mod repository;
pub mod service;

pub use catalog::{
    ActuatorAssignment, ActuatorCategory, ActuatorDefinition, ActuatorDefinitionSpec,
    AssignmentChanges, AssignmentId, AssignmentSpec, DefinitionId, DeviceKind,
    ElectricalEnvelope, Lifecycle, PinKind, PinRequirement, Protocol, SensorAssignment,
    SensorCategory, SensorDefinition, SensorDefinitionSpec,
};
pub use error::{ModelError, Result};
pub use gpio::{
    classify_pin, compute_conflicts, free_pins, pin_info, validate_assignment, PinCheck,
    PinClass, PinInfo, PinOccupant,
};
pub use node::{NetworkMode, Node, NodeHealth, NodeId, NodeSpec, Platform};
pub use reading::{ActuatorCommand, CommandStatus, Reading};
pub use repository::{
    ActuatorAssignmentRepository, ActuatorCommandRepository, ActuatorDefinitionRepository,
    NodeRepository, ReadingRepository, SensorAssignmentRepository, SensorDefinitionRepository,
};
pub use service::DeviceModelService;
