//! Concurrent in-memory repositories.
//!
//! Each repository is a [`DashMap`] keyed by id, with ids handed out from
//! an atomic counter. Ordering guarantees (assignments by pin, readings
//! newest first) are produced at query time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use pinfleet_model::{
    ActuatorAssignment, ActuatorAssignmentRepository, ActuatorCommand, ActuatorCommandRepository,
    ActuatorDefinition, ActuatorDefinitionRepository, ActuatorDefinitionSpec, AssignmentChanges,
    AssignmentId, AssignmentSpec, CommandStatus, DefinitionId, DeviceModelService, Lifecycle,
    ModelError, Node, NodeHealth, NodeId, NodeRepository, NodeSpec, Reading, ReadingRepository,
    Result, SensorAssignment, SensorAssignmentRepository, SensorDefinition,
    SensorDefinitionRepository, SensorDefinitionSpec,
};

fn next(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::Relaxed)
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// In-memory node repository.
#[derive(Default)]
pub struct MemoryNodeRepository {
    nodes: DashMap<NodeId, Node>,
    next_id: AtomicI64,
}

impl MemoryNodeRepository {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl NodeRepository for MemoryNodeRepository {
    async fn insert(&self, spec: NodeSpec) -> Result<Node> {
        let now = Utc::now();
        let node = Node {
            id: next(&self.next_id),
            name: spec.name,
            platform: spec.platform,
            mac_address: spec.mac_address,
            ip_address: spec.ip_address,
            location: spec.location,
            firmware_version: spec.firmware_version,
            // Nodes report in before they count as online.
            health: NodeHealth::Offline,
            last_heartbeat: None,
            network: spec.network,
            created_at: now,
            updated_at: now,
        };
        self.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn get(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.get(&id).map(|n| n.clone()))
    }

    async fn list(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|n| n.clone()).collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn update_health(&self, id: NodeId, health: NodeHealth) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("node {id}")))?;
        node.health = health;
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn record_heartbeat(&self, id: NodeId, timestamp: i64) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("node {id}")))?;
        node.last_heartbeat = Some(timestamp);
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn set_firmware_version(&self, id: NodeId, version: String) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("node {id}")))?;
        node.firmware_version = Some(version);
        node.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory sensor definition repository.
#[derive(Default)]
pub struct MemorySensorDefinitionRepository {
    definitions: DashMap<DefinitionId, SensorDefinition>,
    next_id: AtomicI64,
}

impl MemorySensorDefinitionRepository {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

fn sensor_definition_from(spec: SensorDefinitionSpec, id: DefinitionId) -> SensorDefinition {
    let now = Utc::now();
    SensorDefinition {
        id,
        name: spec.name,
        model: spec.model,
        manufacturer: spec.manufacturer,
        category: spec.category,
        protocol: spec.protocol,
        electrical: spec.electrical,
        pins: spec.pins,
        unit: spec.unit,
        range_min: spec.range_min,
        range_max: spec.range_max,
        precision: spec.precision,
        read_latency_ms: spec.read_latency_ms,
        default_calibration: spec
            .default_calibration
            .unwrap_or_else(|| serde_json::json!({})),
        default_config: spec.default_config.unwrap_or_else(|| serde_json::json!({})),
        datasheet_url: spec.datasheet_url,
        notes: spec.notes,
        lifecycle: Lifecycle::Active,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl SensorDefinitionRepository for MemorySensorDefinitionRepository {
    async fn insert(&self, spec: SensorDefinitionSpec) -> Result<SensorDefinition> {
        let definition = sensor_definition_from(spec, next(&self.next_id));
        self.definitions.insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn get(&self, id: DefinitionId) -> Result<Option<SensorDefinition>> {
        Ok(self.definitions.get(&id).map(|d| d.clone()))
    }

    async fn list_active(&self) -> Result<Vec<SensorDefinition>> {
        let mut defs: Vec<SensorDefinition> = self
            .definitions
            .iter()
            .filter(|d| d.lifecycle.is_active())
            .map(|d| d.clone())
            .collect();
        defs.sort_by_key(|d| d.id);
        Ok(defs)
    }

    async fn update(
        &self,
        id: DefinitionId,
        spec: SensorDefinitionSpec,
    ) -> Result<SensorDefinition> {
        let mut entry = self
            .definitions
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("sensor definition {id}")))?;
        let mut updated = sensor_definition_from(spec, id);
        updated.lifecycle = entry.lifecycle;
        updated.created_at = entry.created_at;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn set_lifecycle(&self, id: DefinitionId, lifecycle: Lifecycle) -> Result<()> {
        let mut entry = self
            .definitions
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("sensor definition {id}")))?;
        entry.lifecycle = lifecycle;
        entry.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory actuator definition repository.
#[derive(Default)]
pub struct MemoryActuatorDefinitionRepository {
    definitions: DashMap<DefinitionId, ActuatorDefinition>,
    next_id: AtomicI64,
}

impl MemoryActuatorDefinitionRepository {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

fn actuator_definition_from(spec: ActuatorDefinitionSpec, id: DefinitionId) -> ActuatorDefinition {
    let now = Utc::now();
    ActuatorDefinition {
        id,
        name: spec.name,
        model: spec.model,
        manufacturer: spec.manufacturer,
        category: spec.category,
        protocol: spec.protocol,
        electrical: spec.electrical,
        pins: spec.pins,
        control_min: spec.control_min,
        control_max: spec.control_max,
        response_latency_ms: spec.response_latency_ms,
        default_config: spec.default_config.unwrap_or_else(|| serde_json::json!({})),
        datasheet_url: spec.datasheet_url,
        notes: spec.notes,
        lifecycle: Lifecycle::Active,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl ActuatorDefinitionRepository for MemoryActuatorDefinitionRepository {
    async fn insert(&self, spec: ActuatorDefinitionSpec) -> Result<ActuatorDefinition> {
        let definition = actuator_definition_from(spec, next(&self.next_id));
        self.definitions.insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn get(&self, id: DefinitionId) -> Result<Option<ActuatorDefinition>> {
        Ok(self.definitions.get(&id).map(|d| d.clone()))
    }

    async fn list_active(&self) -> Result<Vec<ActuatorDefinition>> {
        let mut defs: Vec<ActuatorDefinition> = self
            .definitions
            .iter()
            .filter(|d| d.lifecycle.is_active())
            .map(|d| d.clone())
            .collect();
        defs.sort_by_key(|d| d.id);
        Ok(defs)
    }

    async fn update(
        &self,
        id: DefinitionId,
        spec: ActuatorDefinitionSpec,
    ) -> Result<ActuatorDefinition> {
        let mut entry = self
            .definitions
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("actuator definition {id}")))?;
        let mut updated = actuator_definition_from(spec, id);
        updated.lifecycle = entry.lifecycle;
        updated.created_at = entry.created_at;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn set_lifecycle(&self, id: DefinitionId, lifecycle: Lifecycle) -> Result<()> {
        let mut entry = self
            .definitions
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("actuator definition {id}")))?;
        entry.lifecycle = lifecycle;
        entry.updated_at = Utc::now();
        Ok(())
    }
}

fn apply_changes_common(
    changes: &AssignmentChanges,
    pin: &mut u8,
    alias: &mut Option<String>,
    location: &mut Option<String>,
    config: &mut serde_json::Value,
    notes: &mut Option<String>,
) {
    if let Some(new_pin) = changes.pin {
        *pin = new_pin;
    }
    if let Some(new_alias) = &changes.alias {
        *alias = Some(new_alias.clone());
    }
    if let Some(new_location) = &changes.location {
        *location = Some(new_location.clone());
    }
    if let Some(new_config) = &changes.config {
        *config = new_config.clone();
    }
    if let Some(new_notes) = &changes.notes {
        *notes = Some(new_notes.clone());
    }
}

/// In-memory sensor assignment repository.
#[derive(Default)]
pub struct MemorySensorAssignmentRepository {
    assignments: DashMap<AssignmentId, SensorAssignment>,
    next_id: AtomicI64,
}

impl MemorySensorAssignmentRepository {
    pub fn new() -> Self {
        Self {
            assignments: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl SensorAssignmentRepository for MemorySensorAssignmentRepository {
    async fn insert(&self, spec: AssignmentSpec) -> Result<SensorAssignment> {
        let now = Utc::now();
        let assignment = SensorAssignment {
            id: next(&self.next_id),
            definition_id: spec.definition_id,
            node_id: spec.node_id,
            pin: spec.pin,
            alias: spec.alias,
            location: spec.location,
            calibration: spec.calibration.unwrap_or_else(|| serde_json::json!({})),
            config: spec.config.unwrap_or_else(|| serde_json::json!({})),
            installed_at: spec.installed_at,
            lifecycle: Lifecycle::Active,
            last_value_at: None,
            notes: spec.notes,
            created_at: now,
            updated_at: now,
        };
        self.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn get(&self, id: AssignmentId) -> Result<Option<SensorAssignment>> {
        Ok(self.assignments.get(&id).map(|a| a.clone()))
    }

    async fn list_active_by_node(&self, node_id: NodeId) -> Result<Vec<SensorAssignment>> {
        let mut out: Vec<SensorAssignment> = self
            .assignments
            .iter()
            .filter(|a| a.node_id == node_id && a.lifecycle.is_active())
            .map(|a| a.clone())
            .collect();
        out.sort_by_key(|a| (a.pin, a.id));
        Ok(out)
    }

    async fn count_active_for_definition(&self, definition_id: DefinitionId) -> Result<usize> {
        Ok(self
            .assignments
            .iter()
            .filter(|a| a.definition_id == definition_id && a.lifecycle.is_active())
            .count())
    }

    async fn update(
        &self,
        id: AssignmentId,
        changes: AssignmentChanges,
    ) -> Result<SensorAssignment> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("sensor assignment {id}")))?;
        let entry = &mut *entry;
        apply_changes_common(
            &changes,
            &mut entry.pin,
            &mut entry.alias,
            &mut entry.location,
            &mut entry.config,
            &mut entry.notes,
        );
        if let Some(calibration) = &changes.calibration {
            entry.calibration = calibration.clone();
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn set_lifecycle(&self, id: AssignmentId, lifecycle: Lifecycle) -> Result<()> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("sensor assignment {id}")))?;
        entry.lifecycle = lifecycle;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn touch_last_value(&self, id: AssignmentId, timestamp: i64) -> Result<()> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("sensor assignment {id}")))?;
        entry.last_value_at = millis_to_datetime(timestamp);
        Ok(())
    }
}

/// In-memory actuator assignment repository.
#[derive(Default)]
pub struct MemoryActuatorAssignmentRepository {
    assignments: DashMap<AssignmentId, ActuatorAssignment>,
    next_id: AtomicI64,
}

impl MemoryActuatorAssignmentRepository {
    pub fn new() -> Self {
        Self {
            assignments: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ActuatorAssignmentRepository for MemoryActuatorAssignmentRepository {
    async fn insert(&self, spec: AssignmentSpec) -> Result<ActuatorAssignment> {
        let now = Utc::now();
        let assignment = ActuatorAssignment {
            id: next(&self.next_id),
            definition_id: spec.definition_id,
            node_id: spec.node_id,
            pin: spec.pin,
            alias: spec.alias,
            location: spec.location,
            config: spec.config.unwrap_or_else(|| serde_json::json!({})),
            current_state: serde_json::Value::Null,
            installed_at: spec.installed_at,
            lifecycle: Lifecycle::Active,
            last_actuated_at: None,
            notes: spec.notes,
            created_at: now,
            updated_at: now,
        };
        self.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn get(&self, id: AssignmentId) -> Result<Option<ActuatorAssignment>> {
        Ok(self.assignments.get(&id).map(|a| a.clone()))
    }

    async fn list_active_by_node(&self, node_id: NodeId) -> Result<Vec<ActuatorAssignment>> {
        let mut out: Vec<ActuatorAssignment> = self
            .assignments
            .iter()
            .filter(|a| a.node_id == node_id && a.lifecycle.is_active())
            .map(|a| a.clone())
            .collect();
        out.sort_by_key(|a| (a.pin, a.id));
        Ok(out)
    }

    async fn count_active_for_definition(&self, definition_id: DefinitionId) -> Result<usize> {
        Ok(self
            .assignments
            .iter()
            .filter(|a| a.definition_id == definition_id && a.lifecycle.is_active())
            .count())
    }

    async fn update(
        &self,
        id: AssignmentId,
        changes: AssignmentChanges,
    ) -> Result<ActuatorAssignment> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("actuator assignment {id}")))?;
        let entry = &mut *entry;
        apply_changes_common(
            &changes,
            &mut entry.pin,
            &mut entry.alias,
            &mut entry.location,
            &mut entry.config,
            &mut entry.notes,
        );
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn set_lifecycle(&self, id: AssignmentId, lifecycle: Lifecycle) -> Result<()> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("actuator assignment {id}")))?;
        entry.lifecycle = lifecycle;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn set_current_state(
        &self,
        id: AssignmentId,
        state: serde_json::Value,
        timestamp: i64,
    ) -> Result<()> {
        let mut entry = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("actuator assignment {id}")))?;
        entry.current_state = state;
        entry.last_actuated_at = millis_to_datetime(timestamp);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory reading repository.
#[derive(Default)]
pub struct MemoryReadingRepository {
    readings: DashMap<i64, Reading>,
    next_id: AtomicI64,
}

impl MemoryReadingRepository {
    pub fn new() -> Self {
        Self {
            readings: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ReadingRepository for MemoryReadingRepository {
    async fn insert(
        &self,
        assignment_id: AssignmentId,
        value: f64,
        unit: Option<String>,
        timestamp: i64,
    ) -> Result<Reading> {
        let reading = Reading {
            id: next(&self.next_id),
            assignment_id,
            value,
            unit,
            timestamp,
        };
        self.readings.insert(reading.id, reading.clone());
        Ok(reading)
    }

    async fn latest(&self, assignment_id: AssignmentId) -> Result<Option<Reading>> {
        Ok(self
            .readings
            .iter()
            .filter(|r| r.assignment_id == assignment_id)
            .max_by_key(|r| (r.timestamp, r.id))
            .map(|r| r.clone()))
    }

    async fn recent(&self, assignment_id: AssignmentId, limit: usize) -> Result<Vec<Reading>> {
        let mut out: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| r.assignment_id == assignment_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| std::cmp::Reverse((r.timestamp, r.id)));
        out.truncate(limit);
        Ok(out)
    }

    async fn delete_before(&self, cutoff: i64) -> Result<usize> {
        let before = self.readings.len();
        self.readings.retain(|_, r| r.timestamp >= cutoff);
        let removed = before - self.readings.len();
        if removed > 0 {
            debug!(removed, cutoff, "pruned old readings");
        }
        Ok(removed)
    }
}

/// In-memory actuator command queue.
#[derive(Default)]
pub struct MemoryActuatorCommandRepository {
    commands: DashMap<i64, ActuatorCommand>,
    next_id: AtomicI64,
}

impl MemoryActuatorCommandRepository {
    pub fn new() -> Self {
        Self {
            commands: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ActuatorCommandRepository for MemoryActuatorCommandRepository {
    async fn enqueue(
        &self,
        actuator_id: AssignmentId,
        payload: serde_json::Value,
        issued_at: i64,
    ) -> Result<ActuatorCommand> {
        let command = ActuatorCommand {
            id: next(&self.next_id),
            actuator_id,
            payload,
            status: CommandStatus::Pending,
            issued_at,
        };
        self.commands.insert(command.id, command.clone());
        Ok(command)
    }

    async fn pending_for(&self, actuator_id: AssignmentId) -> Result<Vec<ActuatorCommand>> {
        let mut out: Vec<ActuatorCommand> = self
            .commands
            .iter()
            .filter(|c| c.actuator_id == actuator_id && c.status == CommandStatus::Pending)
            .map(|c| c.clone())
            .collect();
        out.sort_by_key(|c| (c.issued_at, c.id));
        Ok(out)
    }

    async fn mark_dispatched(&self, id: i64) -> Result<()> {
        let mut entry = self
            .commands
            .get_mut(&id)
            .ok_or_else(|| ModelError::NotFound(format!("command {id}")))?;
        entry.status = CommandStatus::Dispatched;
        Ok(())
    }

    async fn delete_before(&self, cutoff: i64) -> Result<usize> {
        let before = self.commands.len();
        self.commands.retain(|_, c| c.issued_at >= cutoff);
        let removed = before - self.commands.len();
        if removed > 0 {
            debug!(removed, cutoff, "pruned old commands");
        }
        Ok(removed)
    }
}

/// All in-memory repositories bundled for one deployment.
#[derive(Clone)]
pub struct MemoryStore {
    pub nodes: Arc<MemoryNodeRepository>,
    pub sensor_defs: Arc<MemorySensorDefinitionRepository>,
    pub actuator_defs: Arc<MemoryActuatorDefinitionRepository>,
    pub sensor_assignments: Arc<MemorySensorAssignmentRepository>,
    pub actuator_assignments: Arc<MemoryActuatorAssignmentRepository>,
    pub readings: Arc<MemoryReadingRepository>,
    pub commands: Arc<MemoryActuatorCommandRepository>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(MemoryNodeRepository::new()),
            sensor_defs: Arc::new(MemorySensorDefinitionRepository::new()),
            actuator_defs: Arc::new(MemoryActuatorDefinitionRepository::new()),
            sensor_assignments: Arc::new(MemorySensorAssignmentRepository::new()),
            actuator_assignments: Arc::new(MemoryActuatorAssignmentRepository::new()),
            readings: Arc::new(MemoryReadingRepository::new()),
            commands: Arc::new(MemoryActuatorCommandRepository::new()),
        }
    }

    /// Wire a [`DeviceModelService`] onto this store.
    pub fn model_service(&self) -> DeviceModelService {
        DeviceModelService::new(
            self.nodes.clone(),
            self.sensor_defs.clone(),
            self.actuator_defs.clone(),
            self.sensor_assignments.clone(),
            self.actuator_assignments.clone(),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinfleet_model::Platform;

    #[tokio::test]
    async fn node_ids_are_sequential() {
        let repo = MemoryNodeRepository::new();
        let a = repo.insert(NodeSpec::new("a", Platform::Esp32)).await.unwrap();
        let b = repo.insert(NodeSpec::new("b", Platform::Esp8266)).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.health, NodeHealth::Offline);
    }

    #[tokio::test]
    async fn readings_recent_is_newest_first() {
        let repo = MemoryReadingRepository::new();
        for (i, ts) in [100i64, 300, 200].iter().enumerate() {
            repo.insert(7, i as f64, None, *ts).await.unwrap();
        }
        let recent = repo.recent(7, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, 300);
        assert_eq!(recent[1].timestamp, 200);

        let latest = repo.latest(7).await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 300);
    }

    #[tokio::test]
    async fn delete_before_prunes_only_older() {
        let repo = MemoryReadingRepository::new();
        repo.insert(1, 1.0, None, 100).await.unwrap();
        repo.insert(1, 2.0, None, 200).await.unwrap();
        let removed = repo.delete_before(150).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.recent(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn command_queue_lifecycle() {
        let repo = MemoryActuatorCommandRepository::new();
        let cmd = repo
            .enqueue(4, serde_json::json!({"state": "on"}), 1_000)
            .await
            .unwrap();
        assert_eq!(cmd.status, CommandStatus::Pending);

        repo.mark_dispatched(cmd.id).await.unwrap();
        assert!(repo.pending_for(4).await.unwrap().is_empty());

        assert!(matches!(
            repo.mark_dispatched(999).await,
            Err(ModelError::NotFound(_))
        ));
    }
}
