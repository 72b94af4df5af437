//! Firmware generation against the live fleet state.

use std::sync::Arc;

use tracing::info;

use pinfleet_model::{
    ActuatorAssignmentRepository, ActuatorDefinitionRepository, ModelError, NodeId,
    NodeRepository, SensorAssignmentRepository, SensorDefinitionRepository,
};

use crate::synthesizer::{Firmware, FirmwareSynthesizer, SynthesisInput, Variant};
use crate::SynthesisError;

/// Loads a node and its active assignments and renders firmware for it.
#[derive(Clone)]
pub struct FirmwareService {
    nodes: Arc<dyn NodeRepository>,
    sensor_defs: Arc<dyn SensorDefinitionRepository>,
    actuator_defs: Arc<dyn ActuatorDefinitionRepository>,
    sensor_assignments: Arc<dyn SensorAssignmentRepository>,
    actuator_assignments: Arc<dyn ActuatorAssignmentRepository>,
    synthesizer: Arc<FirmwareSynthesizer>,
}

impl FirmwareService {
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
            synthesizer: Arc::new(FirmwareSynthesizer::new()),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: FirmwareSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    /// Render firmware for a node from its current active assignments.
    ///
    /// A dangling definition reference aborts generation rather than
    /// silently dropping the peripheral from the sketch.
    pub async fn generate(
        &self,
        node_id: NodeId,
        variant: Variant,
    ) -> Result<Firmware, SynthesisError> {
        let node = self
            .nodes
            .get(node_id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("node {node_id}")))?;

        let mut sensors = Vec::new();
        for assignment in self.sensor_assignments.list_active_by_node(node_id).await? {
            let definition = self
                .sensor_defs
                .get(assignment.definition_id)
                .await?
                .ok_or(SynthesisError::UnknownDefinition {
                    assignment_id: assignment.id,
                    definition_id: assignment.definition_id,
                    kind: "sensor",
                })?;
            sensors.push((assignment, definition));
        }

        let mut actuators = Vec::new();
        for assignment in self
            .actuator_assignments
            .list_active_by_node(node_id)
            .await?
        {
            let definition = self
                .actuator_defs
                .get(assignment.definition_id)
                .await?
                .ok_or(SynthesisError::UnknownDefinition {
                    assignment_id: assignment.id,
                    definition_id: assignment.definition_id,
                    kind: "actuator",
                })?;
            actuators.push((assignment, definition));
        }

        let input = SynthesisInput {
            node,
            sensors,
            actuators,
        };
        let firmware = self.synthesizer.synthesize(&input, variant)?;
        info!(
            node_id,
            filename = %firmware.filename,
            bytes = firmware.size_bytes(),
            "firmware generated"
        );
        Ok(firmware)
    }
}
