//! Device model orchestration.
//!
//! Ties the catalog, the GPIO validator and the repositories together.
//! Pin rejections abort an assignment; cautions and conflicts are logged
//! and returned to the caller alongside the created record.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{
    ActuatorAssignment, ActuatorDefinition, ActuatorDefinitionSpec, AssignmentChanges,
    AssignmentId, AssignmentSpec, DefinitionId, DeviceKind, ElectricalEnvelope, Lifecycle,
    SensorAssignment, SensorDefinition, SensorDefinitionSpec,
};
use crate::error::{ModelError, Result};
use crate::gpio::{self, PinCheck, PinOccupant};
use crate::node::{Node, NodeId, NodeSpec};
use crate::repository::{
    ActuatorAssignmentRepository, ActuatorDefinitionRepository, NodeRepository,
    SensorAssignmentRepository, SensorDefinitionRepository,
};

/// Catalog and assignment service.
///
/// Cloning is cheap; all state lives behind the injected repositories.
#[derive(Clone)]
pub struct DeviceModelService {
    nodes: Arc<dyn NodeRepository>,
    sensor_defs: Arc<dyn SensorDefinitionRepository>,
    actuator_defs: Arc<dyn ActuatorDefinitionRepository>,
    sensor_assignments: Arc<dyn SensorAssignmentRepository>,
    actuator_assignments: Arc<dyn ActuatorAssignmentRepository>,
}

impl DeviceModelService {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        sensor_defs: Arc<dyn SensorDefinitionRepository>,
        actuator_defs: Arc<dyn ActuatorDefinitionRepository>,
        sensor_assignments: Arc<dyn SensorAssignmentRepository>,
        actuator_assignments: Arc<dyn ActuatorAssignmentRepository>,
    ) -> Self {
        Self {
            nodes,
            sensor_defs,
            actuator_defs,
            sensor_assignments,
            actuator_assignments,
        }
    }

    // ---- nodes ----

    pub async fn register_node(&self, spec: NodeSpec) -> Result<Node> {
        if spec.name.trim().is_empty() {
            return Err(ModelError::Validation("node name is required".to_string()));
        }
        let node = self.nodes.insert(spec).await?;
        info!(node_id = node.id, name = %node.name, platform = %node.platform, "node registered");
        Ok(node)
    }

    pub async fn node(&self, id: NodeId) -> Result<Node> {
        self.nodes
            .get(id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("node {id}")))
    }

    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.nodes.list().await
    }

    // ---- definitions ----

    pub async fn create_sensor_definition(
        &self,
        spec: SensorDefinitionSpec,
    ) -> Result<SensorDefinition> {
        validate_name(&spec.name)?;
        validate_envelope(&spec.electrical)?;
        validate_range(spec.range_min, spec.range_max)?;
        self.sensor_defs.insert(spec).await
    }

    pub async fn update_sensor_definition(
        &self,
        id: DefinitionId,
        spec: SensorDefinitionSpec,
    ) -> Result<SensorDefinition> {
        validate_name(&spec.name)?;
        validate_envelope(&spec.electrical)?;
        validate_range(spec.range_min, spec.range_max)?;
        self.sensor_defs.update(id, spec).await
    }

    /// Retire a sensor definition.
    ///
    /// Fails with [`ModelError::DefinitionInUse`] while active assignments
    /// still reference it; retired assignments do not count.
    pub async fn retire_sensor_definition(&self, id: DefinitionId) -> Result<()> {
        let active_refs = self
            .sensor_assignments
            .count_active_for_definition(id)
            .await?;
        if active_refs > 0 {
            return Err(ModelError::DefinitionInUse { id, active_refs });
        }
        self.sensor_defs.set_lifecycle(id, Lifecycle::Retired).await
    }

    pub async fn create_actuator_definition(
        &self,
        spec: ActuatorDefinitionSpec,
    ) -> Result<ActuatorDefinition> {
        validate_name(&spec.name)?;
        validate_envelope(&spec.electrical)?;
        validate_range(spec.control_min, spec.control_max)?;
        self.actuator_defs.insert(spec).await
    }

    pub async fn update_actuator_definition(
        &self,
        id: DefinitionId,
        spec: ActuatorDefinitionSpec,
    ) -> Result<ActuatorDefinition> {
        validate_name(&spec.name)?;
        validate_envelope(&spec.electrical)?;
        validate_range(spec.control_min, spec.control_max)?;
        self.actuator_defs.update(id, spec).await
    }

    pub async fn retire_actuator_definition(&self, id: DefinitionId) -> Result<()> {
        let active_refs = self
            .actuator_assignments
            .count_active_for_definition(id)
            .await?;
        if active_refs > 0 {
            return Err(ModelError::DefinitionInUse { id, active_refs });
        }
        self.actuator_defs
            .set_lifecycle(id, Lifecycle::Retired)
            .await
    }

    // ---- assignments ----

    /// Bind a sensor definition to a node pin.
    ///
    /// Returns the created assignment and the pin check; a check with a
    /// caution or conflicts still creates the assignment, and heeding it
    /// is the caller's call.
    pub async fn create_sensor_assignment(
        &self,
        spec: AssignmentSpec,
    ) -> Result<(SensorAssignment, PinCheck)> {
        let node = self.node(spec.node_id).await?;
        let definition = self
            .sensor_defs
            .get(spec.definition_id)
            .await?
            .ok_or_else(|| {
                ModelError::NotFound(format!("sensor definition {}", spec.definition_id))
            })?;
        if !definition.lifecycle.is_active() {
            return Err(ModelError::Validation(format!(
                "sensor definition {} is retired",
                definition.id
            )));
        }

        let occupants = self.occupants_on_pin(node.id, spec.pin, None).await?;
        let check =
            gpio::validate_assignment(node.platform, spec.pin, DeviceKind::Sensor, &occupants)?;
        log_check(&check, node.id);

        let assignment = self.sensor_assignments.insert(spec).await?;
        Ok((assignment, check))
    }

    pub async fn create_actuator_assignment(
        &self,
        spec: AssignmentSpec,
    ) -> Result<(ActuatorAssignment, PinCheck)> {
        let node = self.node(spec.node_id).await?;
        let definition = self
            .actuator_defs
            .get(spec.definition_id)
            .await?
            .ok_or_else(|| {
                ModelError::NotFound(format!("actuator definition {}", spec.definition_id))
            })?;
        if !definition.lifecycle.is_active() {
            return Err(ModelError::Validation(format!(
                "actuator definition {} is retired",
                definition.id
            )));
        }

        let occupants = self.occupants_on_pin(node.id, spec.pin, None).await?;
        let check =
            gpio::validate_assignment(node.platform, spec.pin, DeviceKind::Actuator, &occupants)?;
        log_check(&check, node.id);

        let assignment = self.actuator_assignments.insert(spec).await?;
        Ok((assignment, check))
    }

    /// Edit a sensor assignment. A pin move is revalidated; the bound
    /// definition is immutable (retire and recreate instead).
    pub async fn update_sensor_assignment(
        &self,
        id: AssignmentId,
        changes: AssignmentChanges,
    ) -> Result<(SensorAssignment, Option<PinCheck>)> {
        let current = self
            .sensor_assignments
            .get(id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("sensor assignment {id}")))?;

        let check = match changes.pin {
            Some(pin) if pin != current.pin => {
                let node = self.node(current.node_id).await?;
                let occupants = self
                    .occupants_on_pin(node.id, pin, Some((DeviceKind::Sensor, id)))
                    .await?;
                let check =
                    gpio::validate_assignment(node.platform, pin, DeviceKind::Sensor, &occupants)?;
                log_check(&check, node.id);
                Some(check)
            }
            _ => None,
        };

        let assignment = self.sensor_assignments.update(id, changes).await?;
        Ok((assignment, check))
    }

    pub async fn update_actuator_assignment(
        &self,
        id: AssignmentId,
        changes: AssignmentChanges,
    ) -> Result<(ActuatorAssignment, Option<PinCheck>)> {
        let current = self
            .actuator_assignments
            .get(id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("actuator assignment {id}")))?;

        let check = match changes.pin {
            Some(pin) if pin != current.pin => {
                let node = self.node(current.node_id).await?;
                let occupants = self
                    .occupants_on_pin(node.id, pin, Some((DeviceKind::Actuator, id)))
                    .await?;
                let check = gpio::validate_assignment(
                    node.platform,
                    pin,
                    DeviceKind::Actuator,
                    &occupants,
                )?;
                log_check(&check, node.id);
                Some(check)
            }
            _ => None,
        };

        let assignment = self.actuator_assignments.update(id, changes).await?;
        Ok((assignment, check))
    }

    /// Retire a sensor assignment; its pin becomes free again and its
    /// readings stay queryable.
    pub async fn retire_sensor_assignment(&self, id: AssignmentId) -> Result<()> {
        self.sensor_assignments
            .set_lifecycle(id, Lifecycle::Retired)
            .await
    }

    pub async fn retire_actuator_assignment(&self, id: AssignmentId) -> Result<()> {
        self.actuator_assignments
            .set_lifecycle(id, Lifecycle::Retired)
            .await
    }

    pub async fn sensor_assignments_for(&self, node_id: NodeId) -> Result<Vec<SensorAssignment>> {
        self.sensor_assignments.list_active_by_node(node_id).await
    }

    pub async fn actuator_assignments_for(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<ActuatorAssignment>> {
        self.actuator_assignments.list_active_by_node(node_id).await
    }

    // ---- pin views ----

    /// Assignable pins on a node with no active occupant.
    pub async fn free_pins(&self, node_id: NodeId) -> Result<Vec<u8>> {
        let node = self.node(node_id).await?;
        let occupied = self.occupied_pins(node_id).await?;
        Ok(gpio::free_pins(node.platform, &occupied))
    }

    /// Pins on a node claimed by more than one active assignment.
    pub async fn pin_conflicts(&self, node_id: NodeId) -> Result<BTreeSet<u8>> {
        let sensor_pins: Vec<u8> = self
            .sensor_assignments
            .list_active_by_node(node_id)
            .await?
            .iter()
            .map(|a| a.pin)
            .collect();
        let actuator_pins: Vec<u8> = self
            .actuator_assignments
            .list_active_by_node(node_id)
            .await?
            .iter()
            .map(|a| a.pin)
            .collect();
        Ok(gpio::compute_conflicts(&[&sensor_pins, &actuator_pins]))
    }

    async fn occupied_pins(&self, node_id: NodeId) -> Result<Vec<u8>> {
        let mut pins: Vec<u8> = self
            .sensor_assignments
            .list_active_by_node(node_id)
            .await?
            .iter()
            .map(|a| a.pin)
            .collect();
        pins.extend(
            self.actuator_assignments
                .list_active_by_node(node_id)
                .await?
                .iter()
                .map(|a| a.pin),
        );
        pins.sort_unstable();
        pins.dedup();
        Ok(pins)
    }

    /// Active assignments of either kind holding `pin` on `node_id`,
    /// optionally excluding the assignment being edited.
    async fn occupants_on_pin(
        &self,
        node_id: NodeId,
        pin: u8,
        exclude: Option<(DeviceKind, AssignmentId)>,
    ) -> Result<Vec<PinOccupant>> {
        let mut occupants = Vec::new();
        for a in self.sensor_assignments.list_active_by_node(node_id).await? {
            if a.pin == pin && exclude != Some((DeviceKind::Sensor, a.id)) {
                occupants.push(PinOccupant {
                    assignment_id: a.id,
                    kind: DeviceKind::Sensor,
                    alias: a.alias.clone(),
                });
            }
        }
        for a in self
            .actuator_assignments
            .list_active_by_node(node_id)
            .await?
        {
            if a.pin == pin && exclude != Some((DeviceKind::Actuator, a.id)) {
                occupants.push(PinOccupant {
                    assignment_id: a.id,
                    kind: DeviceKind::Actuator,
                    alias: a.alias.clone(),
                });
            }
        }
        Ok(occupants)
    }
}

fn log_check(check: &PinCheck, node_id: NodeId) {
    if let Some(caution) = &check.caution {
        warn!(node_id, pin = check.pin, "{caution}");
    }
    if !check.conflicts.is_empty() {
        warn!(
            node_id,
            pin = check.pin,
            occupants = check.conflicts.len(),
            "pin already carries active assignments"
        );
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ModelError::Validation("name is required".to_string()));
    }
    Ok(())
}

fn validate_envelope(envelope: &ElectricalEnvelope) -> Result<()> {
    if let (Some(min), Some(max)) = (envelope.voltage_min, envelope.voltage_max) {
        if min > max {
            return Err(ModelError::Validation(format!(
                "voltage_min {min} exceeds voltage_max {max}"
            )));
        }
    }
    Ok(())
}

fn validate_range(min: Option<f64>, max: Option<f64>) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ModelError::Validation(format!(
                "range minimum {min} exceeds maximum {max}"
            )));
        }
    }
    Ok(())
}
