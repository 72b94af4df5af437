//! Telemetry streaming and the actuator command relay.
//!
//! One poller task exists per watched sensor assignment, shared by every
//! subscriber through a reference count. The first subscription starts the
//! task, the last one dropped stops it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pinfleet_core::{EventBus, EventMetadata, FilteredReceiver, FleetEvent, SharedEventBus};
use pinfleet_model::{
    ActuatorAssignmentRepository, ActuatorCommand, ActuatorCommandRepository, AssignmentId,
    ModelError, NodeHealth, NodeId, NodeRepository, Reading, ReadingRepository, Result,
    SensorAssignmentRepository,
};

/// How often a poller re-reads the latest persisted value.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

type EventFilter = Box<dyn Fn(&FleetEvent) -> bool + Send>;

struct PollerSlot {
    subscribers: usize,
    handle: JoinHandle<()>,
}

/// One node's row in a fleet status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub name: String,
    pub health: NodeHealth,
    pub last_heartbeat: Option<i64>,
}

/// Streams readings to subscribers and relays commands to nodes.
#[derive(Clone)]
pub struct TelemetryBroker {
    bus: SharedEventBus,
    nodes: Arc<dyn NodeRepository>,
    sensor_assignments: Arc<dyn SensorAssignmentRepository>,
    actuator_assignments: Arc<dyn ActuatorAssignmentRepository>,
    readings: Arc<dyn ReadingRepository>,
    commands: Arc<dyn ActuatorCommandRepository>,
    pollers: Arc<DashMap<AssignmentId, PollerSlot>>,
    poll_interval: Duration,
}

impl TelemetryBroker {
    pub fn new(
        bus: SharedEventBus,
        nodes: Arc<dyn NodeRepository>,
        sensor_assignments: Arc<dyn SensorAssignmentRepository>,
        actuator_assignments: Arc<dyn ActuatorAssignmentRepository>,
        readings: Arc<dyn ReadingRepository>,
        commands: Arc<dyn ActuatorCommandRepository>,
    ) -> Self {
        Self {
            bus,
            nodes,
            sensor_assignments,
            actuator_assignments,
            readings,
            commands,
            pollers: Arc::new(DashMap::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll cadence (tests use millisecond intervals).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    // ---- ingest ----

    /// Persist a reading reported by a node and broadcast it.
    pub async fn record_reading(
        &self,
        assignment_id: AssignmentId,
        value: f64,
        unit: Option<String>,
    ) -> Result<Reading> {
        let assignment = self
            .sensor_assignments
            .get(assignment_id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("sensor assignment {assignment_id}")))?;
        if !assignment.lifecycle.is_active() {
            return Err(ModelError::Validation(format!(
                "sensor assignment {assignment_id} is retired"
            )));
        }

        let timestamp = now_ms();
        let reading = self
            .readings
            .insert(assignment_id, value, unit.clone(), timestamp)
            .await?;
        self.sensor_assignments
            .touch_last_value(assignment_id, timestamp)
            .await?;

        self.bus.publish_with_source(
            FleetEvent::SensorReading {
                assignment_id,
                value,
                unit,
                timestamp,
            },
            "ingest",
        );
        Ok(reading)
    }

    /// Record a node heartbeat; the health monitor turns fresh heartbeats
    /// into state transitions.
    pub async fn record_heartbeat(&self, node_id: NodeId) -> Result<()> {
        self.nodes.record_heartbeat(node_id, now_ms()).await
    }

    // ---- subscriptions ----

    /// Subscribe to the reading stream of one sensor assignment.
    ///
    /// The first subscriber starts a poller that republishes the latest
    /// persisted value every poll interval; later subscribers share it.
    pub async fn subscribe(&self, assignment_id: AssignmentId) -> Result<SensorSubscription> {
        let assignment = self
            .sensor_assignments
            .get(assignment_id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("sensor assignment {assignment_id}")))?;
        if !assignment.lifecycle.is_active() {
            return Err(ModelError::Validation(format!(
                "sensor assignment {assignment_id} is retired"
            )));
        }

        let receiver = self.bus.subscribe_filtered(Box::new(move |event: &FleetEvent| {
            matches!(event, FleetEvent::SensorReading { assignment_id: id, .. } if *id == assignment_id)
        }) as EventFilter);

        let mut slot = self
            .pollers
            .entry(assignment_id)
            .or_insert_with(|| PollerSlot {
                subscribers: 0,
                handle: self.spawn_poller(assignment_id),
            });
        slot.subscribers += 1;
        debug!(
            assignment_id,
            subscribers = slot.subscribers,
            "reading subscription added"
        );
        drop(slot);

        Ok(SensorSubscription {
            assignment_id,
            receiver,
            pollers: self.pollers.clone(),
        })
    }

    fn spawn_poller(&self, assignment_id: AssignmentId) -> JoinHandle<()> {
        let readings = self.readings.clone();
        let bus = self.bus.clone();
        let interval = self.poll_interval;
        info!(assignment_id, "starting reading poller");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick replays the latest value to new
            // subscribers without waiting a full interval.
            loop {
                ticker.tick().await;
                match readings.latest(assignment_id).await {
                    Ok(Some(reading)) => {
                        bus.publish_with_source(
                            FleetEvent::SensorReading {
                                assignment_id,
                                value: reading.value,
                                unit: reading.unit,
                                timestamp: reading.timestamp,
                            },
                            "poller",
                        );
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(assignment_id, error = %err, "poller read failed");
                    }
                }
            }
        })
    }

    /// Number of live poller tasks.
    pub fn active_pollers(&self) -> usize {
        self.pollers.len()
    }

    /// Subscriber count for one assignment's poller.
    pub fn poller_subscribers(&self, assignment_id: AssignmentId) -> usize {
        self.pollers
            .get(&assignment_id)
            .map(|slot| slot.subscribers)
            .unwrap_or(0)
    }

    // ---- commands ----

    /// Queue a command for an actuator.
    ///
    /// The command is persisted as pending, the assignment's current state
    /// is updated, and a state-change event is broadcast to everyone
    /// watching the actuator. The caller gets the queued command back as
    /// its receipt.
    pub async fn send_command(
        &self,
        actuator_id: AssignmentId,
        payload: serde_json::Value,
    ) -> Result<ActuatorCommand> {
        let assignment = self
            .actuator_assignments
            .get(actuator_id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("actuator assignment {actuator_id}")))?;
        if !assignment.lifecycle.is_active() {
            return Err(ModelError::Validation(format!(
                "actuator assignment {actuator_id} is retired"
            )));
        }

        let issued_at = now_ms();
        let command = self
            .commands
            .enqueue(actuator_id, payload.clone(), issued_at)
            .await?;
        self.actuator_assignments
            .set_current_state(actuator_id, payload.clone(), issued_at)
            .await?;

        self.bus.publish_with_source(
            FleetEvent::ActuatorCommandResult {
                actuator_id,
                command: payload.clone(),
                status: command.status.to_string(),
                timestamp: issued_at,
            },
            "command",
        );
        self.bus.publish_with_source(
            FleetEvent::ActuatorStateChanged {
                actuator_id,
                command: payload,
                timestamp: issued_at,
            },
            "command",
        );

        info!(actuator_id, command_id = command.id, "command queued");
        Ok(command)
    }

    /// Commands a node should execute, oldest first.
    pub async fn pending_commands(&self, actuator_id: AssignmentId) -> Result<Vec<ActuatorCommand>> {
        self.commands.pending_for(actuator_id).await
    }

    /// Mark a command as handed to its node and broadcast the result.
    pub async fn mark_dispatched(&self, command: &ActuatorCommand) -> Result<()> {
        self.commands.mark_dispatched(command.id).await?;
        self.bus.publish_with_source(
            FleetEvent::ActuatorCommandResult {
                actuator_id: command.actuator_id,
                command: command.payload.clone(),
                status: "dispatched".to_string(),
                timestamp: now_ms(),
            },
            "command",
        );
        Ok(())
    }

    // ---- fleet view ----

    /// Health snapshot of every node.
    pub async fn fleet_status(&self) -> Result<Vec<NodeStatus>> {
        Ok(self
            .nodes
            .list()
            .await?
            .into_iter()
            .map(|node| NodeStatus {
                node_id: node.id,
                name: node.name,
                health: node.health,
                last_heartbeat: node.last_heartbeat,
            })
            .collect())
    }
}

/// Guard for one reading subscription.
///
/// Dropping it releases the shared poller; the last drop stops the task.
pub struct SensorSubscription {
    assignment_id: AssignmentId,
    receiver: FilteredReceiver<EventFilter>,
    pollers: Arc<DashMap<AssignmentId, PollerSlot>>,
}

impl std::fmt::Debug for SensorSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSubscription")
            .field("assignment_id", &self.assignment_id)
            .finish_non_exhaustive()
    }
}

impl SensorSubscription {
    pub fn assignment_id(&self) -> AssignmentId {
        self.assignment_id
    }

    /// Next reading for this assignment; `None` when the bus closes.
    pub async fn recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        self.receiver.try_recv()
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        if let Some(mut slot) = self.pollers.get_mut(&self.assignment_id) {
            slot.subscribers = slot.subscribers.saturating_sub(1);
        }
        // The zero check runs under the map lock, so a subscribe racing
        // this drop either keeps the slot it just joined or spawns a
        // fresh poller after the removal.
        if let Some((_, slot)) = self
            .pollers
            .remove_if(&self.assignment_id, |_, slot| slot.subscribers == 0)
        {
            slot.handle.abort();
            info!(
                assignment_id = self.assignment_id,
                "last subscriber gone, poller stopped"
            );
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
