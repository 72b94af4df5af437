//! Repository ports for persistence.
//!
//! The model never talks to a database directly; callers inject
//! implementations of these traits. Implementations map their own failures
//! to [`ModelError::Storage`](crate::error::ModelError::Storage).

use async_trait::async_trait;

use crate::catalog::{
    ActuatorAssignment, ActuatorDefinition, ActuatorDefinitionSpec, AssignmentChanges,
    AssignmentId, AssignmentSpec, DefinitionId, Lifecycle, SensorAssignment, SensorDefinition,
    SensorDefinitionSpec,
};
use crate::error::Result;
use crate::node::{Node, NodeHealth, NodeId, NodeSpec};
use crate::reading::{ActuatorCommand, Reading};

/// Persistence for fleet nodes.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn insert(&self, spec: NodeSpec) -> Result<Node>;

    async fn get(&self, id: NodeId) -> Result<Option<Node>>;

    async fn list(&self) -> Result<Vec<Node>>;

    /// Overwrite the health state of a node.
    async fn update_health(&self, id: NodeId, health: NodeHealth) -> Result<()>;

    /// Record a heartbeat timestamp (unix millis).
    async fn record_heartbeat(&self, id: NodeId, timestamp: i64) -> Result<()>;

    /// Record the version string of the last synthesized firmware.
    async fn set_firmware_version(&self, id: NodeId, version: String) -> Result<()>;
}

/// Persistence for sensor definitions.
#[async_trait]
pub trait SensorDefinitionRepository: Send + Sync {
    async fn insert(&self, spec: SensorDefinitionSpec) -> Result<SensorDefinition>;

    async fn get(&self, id: DefinitionId) -> Result<Option<SensorDefinition>>;

    /// All definitions still in the active lifecycle.
    async fn list_active(&self) -> Result<Vec<SensorDefinition>>;

    async fn update(&self, id: DefinitionId, spec: SensorDefinitionSpec)
        -> Result<SensorDefinition>;

    async fn set_lifecycle(&self, id: DefinitionId, lifecycle: Lifecycle) -> Result<()>;
}

/// Persistence for actuator definitions.
#[async_trait]
pub trait ActuatorDefinitionRepository: Send + Sync {
    async fn insert(&self, spec: ActuatorDefinitionSpec) -> Result<ActuatorDefinition>;

    async fn get(&self, id: DefinitionId) -> Result<Option<ActuatorDefinition>>;

    async fn list_active(&self) -> Result<Vec<ActuatorDefinition>>;

    async fn update(
        &self,
        id: DefinitionId,
        spec: ActuatorDefinitionSpec,
    ) -> Result<ActuatorDefinition>;

    async fn set_lifecycle(&self, id: DefinitionId, lifecycle: Lifecycle) -> Result<()>;
}

/// Persistence for sensor assignments.
#[async_trait]
pub trait SensorAssignmentRepository: Send + Sync {
    async fn insert(&self, spec: AssignmentSpec) -> Result<SensorAssignment>;

    async fn get(&self, id: AssignmentId) -> Result<Option<SensorAssignment>>;

    /// Active assignments on a node, ordered by pin then id.
    async fn list_active_by_node(&self, node_id: NodeId) -> Result<Vec<SensorAssignment>>;

    /// Number of active assignments referencing a definition.
    async fn count_active_for_definition(&self, definition_id: DefinitionId) -> Result<usize>;

    async fn update(&self, id: AssignmentId, changes: AssignmentChanges)
        -> Result<SensorAssignment>;

    async fn set_lifecycle(&self, id: AssignmentId, lifecycle: Lifecycle) -> Result<()>;

    /// Stamp the time of the most recent persisted reading.
    async fn touch_last_value(&self, id: AssignmentId, timestamp: i64) -> Result<()>;
}

/// Persistence for actuator assignments.
#[async_trait]
pub trait ActuatorAssignmentRepository: Send + Sync {
    async fn insert(&self, spec: AssignmentSpec) -> Result<ActuatorAssignment>;

    async fn get(&self, id: AssignmentId) -> Result<Option<ActuatorAssignment>>;

    async fn list_active_by_node(&self, node_id: NodeId) -> Result<Vec<ActuatorAssignment>>;

    async fn count_active_for_definition(&self, definition_id: DefinitionId) -> Result<usize>;

    async fn update(
        &self,
        id: AssignmentId,
        changes: AssignmentChanges,
    ) -> Result<ActuatorAssignment>;

    async fn set_lifecycle(&self, id: AssignmentId, lifecycle: Lifecycle) -> Result<()>;

    /// Record the last commanded state of the actuator.
    async fn set_current_state(
        &self,
        id: AssignmentId,
        state: serde_json::Value,
        timestamp: i64,
    ) -> Result<()>;
}

/// Persistence for sensor readings.
#[async_trait]
pub trait ReadingRepository: Send + Sync {
    async fn insert(
        &self,
        assignment_id: AssignmentId,
        value: f64,
        unit: Option<String>,
        timestamp: i64,
    ) -> Result<Reading>;

    /// Most recent reading for an assignment.
    async fn latest(&self, assignment_id: AssignmentId) -> Result<Option<Reading>>;

    /// Up to `limit` most recent readings, newest first.
    async fn recent(&self, assignment_id: AssignmentId, limit: usize) -> Result<Vec<Reading>>;

    /// Delete readings captured before `cutoff` (unix millis); returns the
    /// number removed.
    async fn delete_before(&self, cutoff: i64) -> Result<usize>;
}

/// Persistence for the actuator command queue.
#[async_trait]
pub trait ActuatorCommandRepository: Send + Sync {
    async fn enqueue(
        &self,
        actuator_id: AssignmentId,
        payload: serde_json::Value,
        issued_at: i64,
    ) -> Result<ActuatorCommand>;

    /// Pending commands for an actuator, oldest first.
    async fn pending_for(&self, actuator_id: AssignmentId) -> Result<Vec<ActuatorCommand>>;

    async fn mark_dispatched(&self, id: i64) -> Result<()>;

    /// Delete commands issued before `cutoff` (unix millis); returns the
    /// number removed.
    async fn delete_before(&self, cutoff: i64) -> Result<usize>;
}
