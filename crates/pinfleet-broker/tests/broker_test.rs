//! Broker behavior over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use pinfleet_broker::{HealthMonitor, HeartbeatProbe, RetentionConfig, RetentionSweeper, TelemetryBroker};
use pinfleet_core::{EventBus, FleetEvent};
use pinfleet_model::{
    ActuatorAssignmentRepository, ActuatorCategory, ActuatorCommandRepository,
    ActuatorDefinitionSpec, AssignmentSpec, ModelError, NodeHealth, NodeRepository, NodeSpec,
    Platform, Protocol, ReadingRepository, SensorAssignmentRepository, SensorCategory,
    SensorDefinitionSpec,
};
use pinfleet_storage::MemoryStore;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn broker(store: &MemoryStore, bus: Arc<EventBus>) -> TelemetryBroker {
    init_tracing();
    TelemetryBroker::new(
        bus,
        store.nodes.clone(),
        store.sensor_assignments.clone(),
        store.actuator_assignments.clone(),
        store.readings.clone(),
        store.commands.clone(),
    )
    .with_poll_interval(Duration::from_millis(10))
}

async fn seed_sensor(store: &MemoryStore) -> (i64, i64) {
    let svc = store.model_service();
    let node = svc
        .register_node(NodeSpec::new("Kitchen", Platform::Esp32))
        .await
        .unwrap();
    let def = svc
        .create_sensor_definition(SensorDefinitionSpec::new(
            "DHT22",
            SensorCategory::Temperature,
            Protocol::OneWire,
        ))
        .await
        .unwrap();
    let (assignment, _) = svc
        .create_sensor_assignment(AssignmentSpec::new(def.id, node.id, 4))
        .await
        .unwrap();
    (node.id, assignment.id)
}

async fn seed_actuator(store: &MemoryStore) -> i64 {
    let svc = store.model_service();
    let node = svc
        .register_node(NodeSpec::new("Garage", Platform::Esp32))
        .await
        .unwrap();
    let def = svc
        .create_actuator_definition(ActuatorDefinitionSpec::new(
            "Relay 1ch",
            ActuatorCategory::Relay,
            Protocol::Digital,
        ))
        .await
        .unwrap();
    let (assignment, _) = svc
        .create_actuator_assignment(AssignmentSpec::new(def.id, node.id, 26))
        .await
        .unwrap();
    assignment.id
}

#[tokio::test]
async fn subscriptions_share_one_poller() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let broker = broker(&store, bus);
    let (_, assignment) = seed_sensor(&store).await;

    let first = broker.subscribe(assignment).await.unwrap();
    let second = broker.subscribe(assignment).await.unwrap();
    assert_eq!(broker.active_pollers(), 1);
    assert_eq!(broker.poller_subscribers(assignment), 2);

    drop(first);
    assert_eq!(broker.active_pollers(), 1);
    assert_eq!(broker.poller_subscribers(assignment), 1);

    drop(second);
    assert_eq!(broker.active_pollers(), 0);
    assert_eq!(broker.poller_subscribers(assignment), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_subscribe_drop_churn_stays_consistent() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let broker = broker(&store, bus);
    let (_, assignment) = seed_sensor(&store).await;
    broker.record_reading(assignment, 7.0, None).await.unwrap();

    // Parallel subscribe/drop cycles interleave teardown with new
    // subscriptions for the same assignment.
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..200 {
                let subscription = broker.subscribe(assignment).await.unwrap();
                drop(subscription);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(broker.active_pollers(), 0);
    assert_eq!(broker.poller_subscribers(assignment), 0);

    // The churn must not leave the assignment in a state where a new
    // subscriber gets a dead poller.
    let mut subscription = broker.subscribe(assignment).await.unwrap();
    assert_eq!(broker.active_pollers(), 1);
    let (event, meta) = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("poller should emit within a second")
        .expect("bus open");
    assert_eq!(meta.source, "poller");
    assert!(event.is_sensor_reading());
}

#[tokio::test]
async fn poller_replays_latest_persisted_reading() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let broker = broker(&store, bus);
    let (_, assignment) = seed_sensor(&store).await;

    broker.record_reading(assignment, 21.5, None).await.unwrap();

    let mut subscription = broker.subscribe(assignment).await.unwrap();
    let (event, meta) = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("poller should emit within a second")
        .expect("bus open");

    assert_eq!(meta.source, "poller");
    match event {
        FleetEvent::SensorReading {
            assignment_id,
            value,
            ..
        } => {
            assert_eq!(assignment_id, assignment);
            assert_eq!(value, 21.5);
        }
        other => panic!("unexpected event: {}", other.type_name()),
    }
}

#[tokio::test]
async fn record_reading_persists_and_broadcasts() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let mut rx = bus.filter().sensor_readings();
    let broker = broker(&store, bus);
    let (_, assignment) = seed_sensor(&store).await;

    broker
        .record_reading(assignment, 42.0, Some("°C".to_string()))
        .await
        .unwrap();

    let latest = store.readings.latest(assignment).await.unwrap().unwrap();
    assert_eq!(latest.value, 42.0);

    let touched = store
        .sensor_assignments
        .get(assignment)
        .await
        .unwrap()
        .unwrap();
    assert!(touched.last_value_at.is_some());

    let (event, meta) = rx.recv().await.unwrap();
    assert_eq!(meta.source, "ingest");
    assert!(event.is_sensor_reading());
}

#[tokio::test]
async fn subscribe_unknown_assignment_fails() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let broker = broker(&store, bus);

    let err = broker.subscribe(99).await.unwrap_err();
    assert!(matches!(err, ModelError::NotFound(_)));
    assert_eq!(broker.active_pollers(), 0);
}

#[tokio::test]
async fn command_flow_queue_dispatch_broadcast() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let mut rx = bus.filter().actuator_events();
    let broker = broker(&store, bus);
    let actuator = seed_actuator(&store).await;

    let payload = serde_json::json!({"state": "on"});
    let command = broker.send_command(actuator, payload.clone()).await.unwrap();

    // The caller's receipt and the broadcast both reflect the queued state.
    let pending = broker.pending_commands(actuator).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, command.id);

    let (event, _) = rx.recv().await.unwrap();
    match event {
        FleetEvent::ActuatorCommandResult {
            actuator_id,
            status,
            ..
        } => {
            assert_eq!(actuator_id, actuator);
            assert_eq!(status, "pending");
        }
        other => panic!("unexpected event: {}", other.type_name()),
    }
    let (event, _) = rx.recv().await.unwrap();
    assert!(matches!(event, FleetEvent::ActuatorStateChanged { .. }));

    // The assignment remembers its last commanded state.
    let assignment = store
        .actuator_assignments
        .get(actuator)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(assignment.current_state, payload);

    broker.mark_dispatched(&command).await.unwrap();
    assert!(broker.pending_commands(actuator).await.unwrap().is_empty());

    let (event, _) = rx.recv().await.unwrap();
    match event {
        FleetEvent::ActuatorCommandResult { status, .. } => assert_eq!(status, "dispatched"),
        other => panic!("unexpected event: {}", other.type_name()),
    }
}

#[tokio::test]
async fn health_sweep_emits_only_transitions() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let mut rx = bus.filter().node_events();
    let broker = broker(&store, bus.clone());
    let (node, _) = seed_sensor(&store).await;

    let monitor = HealthMonitor::new(store.nodes.clone(), bus)
        .with_probe(Arc::new(HeartbeatProbe::new(Duration::from_secs(90))));

    // Fresh nodes start offline with no heartbeat: sweeping changes nothing.
    monitor.sweep_once().await;
    assert!(rx.try_recv().is_none());

    // A heartbeat flips the node online, exactly once.
    broker.record_heartbeat(node).await.unwrap();
    monitor.sweep_once().await;
    let (event, _) = rx.recv().await.unwrap();
    match event {
        FleetEvent::NodeHealthChanged {
            node_id,
            previous,
            current,
            ..
        } => {
            assert_eq!(node_id, node);
            assert_eq!(previous, "offline");
            assert_eq!(current, "online");
        }
        other => panic!("unexpected event: {}", other.type_name()),
    }
    monitor.sweep_once().await;
    assert!(rx.try_recv().is_none());
}

#[tokio::test]
async fn maintenance_nodes_are_never_swept() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let mut rx = bus.filter().node_events();
    let (node, _) = seed_sensor(&store).await;

    store
        .nodes
        .update_health(node, NodeHealth::Maintenance)
        .await
        .unwrap();

    let monitor = HealthMonitor::new(store.nodes.clone(), bus);
    monitor.sweep_once().await;

    assert!(rx.try_recv().is_none());
    let unchanged = store.nodes.get(node).await.unwrap().unwrap();
    assert_eq!(unchanged.health, NodeHealth::Maintenance);
}

#[tokio::test]
async fn health_monitor_start_stop() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let monitor = HealthMonitor::new(store.nodes.clone(), bus)
        .with_interval(Duration::from_millis(10));

    monitor.start().await;
    assert!(monitor.is_running().await);
    monitor.start().await; // idempotent
    monitor.stop().await;
    assert!(!monitor.is_running().await);
}

#[tokio::test]
async fn retention_sweep_prunes_old_rows() {
    let store = MemoryStore::new();
    let (_, assignment) = seed_sensor(&store).await;
    let actuator = seed_actuator(&store).await;

    let now = chrono::Utc::now().timestamp_millis();
    let forty_days_ago = now - 40 * 86_400_000;
    store
        .readings
        .insert(assignment, 1.0, None, forty_days_ago)
        .await
        .unwrap();
    store.readings.insert(assignment, 2.0, None, now).await.unwrap();
    store
        .commands
        .enqueue(actuator, serde_json::json!({"state": "off"}), forty_days_ago)
        .await
        .unwrap();

    let sweeper = RetentionSweeper::new(
        RetentionConfig::default(),
        store.readings.clone(),
        store.commands.clone(),
    );
    let result = sweeper.sweep_once().await;

    assert_eq!(result.readings_deleted, 1);
    assert_eq!(result.commands_deleted, 1);
    assert!(result.errors.is_empty());

    let latest = store.readings.latest(assignment).await.unwrap().unwrap();
    assert_eq!(latest.value, 2.0);
}

#[tokio::test]
async fn fleet_status_snapshot() {
    let store = MemoryStore::new();
    let bus = Arc::new(EventBus::new());
    let broker = broker(&store, bus);
    let (node, _) = seed_sensor(&store).await;

    let status = broker.fleet_status().await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].node_id, node);
    assert_eq!(status[0].health, NodeHealth::Offline);
    assert!(status[0].last_heartbeat.is_none());
}
