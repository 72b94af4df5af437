//! End-to-end catalog and assignment flows over the in-memory backend.

use pinfleet_model::{
    ActuatorCategory, AssignmentChanges, AssignmentSpec, DeviceModelService, ModelError, NodeSpec,
    Platform, PinClass, Protocol, SensorCategory, SensorDefinitionSpec, ActuatorDefinitionSpec,
};
use pinfleet_storage::MemoryStore;

fn service(store: &MemoryStore) -> DeviceModelService {
    store.model_service()
}

async fn seed_node(svc: &DeviceModelService) -> i64 {
    svc.register_node(NodeSpec::new("Kitchen", Platform::Esp32).with_location("kitchen"))
        .await
        .unwrap()
        .id
}

async fn seed_dht22(svc: &DeviceModelService) -> i64 {
    svc.create_sensor_definition(
        SensorDefinitionSpec::new("DHT22", SensorCategory::Temperature, Protocol::OneWire)
            .with_unit("°C")
            .with_read_latency_ms(2_000),
    )
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn assignment_on_clear_pin() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    let (assignment, check) = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 4).with_alias("Ambient"))
        .await
        .unwrap();

    assert_eq!(assignment.pin, 4);
    assert_eq!(check.class, PinClass::UsableIo);
    assert!(check.is_clear());
}

#[tokio::test]
async fn strapping_pin_creates_with_caution() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    let (assignment, check) = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 12))
        .await
        .unwrap();

    assert_eq!(check.class, PinClass::Strapping);
    assert!(check.caution.is_some());
    // The warning did not block creation.
    assert_eq!(svc.sensor_assignments_for(node).await.unwrap()[0].id, assignment.id);
}

#[tokio::test]
async fn actuator_on_strapping_pin_warns_but_creates() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let relay = svc
        .create_actuator_definition(ActuatorDefinitionSpec::new(
            "Relay 1ch",
            ActuatorCategory::Relay,
            Protocol::Digital,
        ))
        .await
        .unwrap();

    // GPIO 2 is boot-sensitive but assignable.
    let (assignment, check) = svc
        .create_actuator_assignment(AssignmentSpec::new(relay.id, node, 2))
        .await
        .unwrap();
    assert_eq!(assignment.pin, 2);
    assert_eq!(check.class, PinClass::Strapping);
    assert!(check.caution.is_some());
}

#[tokio::test]
async fn restricted_pin_is_rejected() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    let err = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 6))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::PinRejected { pin: 6, .. }));
    assert!(svc.sensor_assignments_for(node).await.unwrap().is_empty());
}

#[tokio::test]
async fn actuator_rejected_on_input_only_pin() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = svc
        .create_actuator_definition(ActuatorDefinitionSpec::new(
            "Relay 1ch",
            ActuatorCategory::Relay,
            Protocol::Digital,
        ))
        .await
        .unwrap()
        .id;

    let err = svc
        .create_actuator_assignment(AssignmentSpec::new(def, node, 34))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::PinRejected { pin: 34, .. }));
}

#[tokio::test]
async fn occupied_pin_reports_conflict_but_creates() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    svc.create_sensor_assignment(AssignmentSpec::new(def, node, 4).with_alias("First"))
        .await
        .unwrap();
    let (_, check) = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 4).with_alias("Second"))
        .await
        .unwrap();

    assert_eq!(check.conflicts.len(), 1);
    assert_eq!(check.conflicts[0].alias.as_deref(), Some("First"));

    let conflicts = svc.pin_conflicts(node).await.unwrap();
    assert!(conflicts.contains(&4));
}

#[tokio::test]
async fn definition_retire_blocked_by_active_assignment() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    let (assignment, _) = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 4))
        .await
        .unwrap();

    let err = svc.retire_sensor_definition(def).await.unwrap_err();
    assert!(matches!(
        err,
        ModelError::DefinitionInUse { active_refs: 1, .. }
    ));

    // Retiring the assignment frees the definition.
    svc.retire_sensor_assignment(assignment.id).await.unwrap();
    svc.retire_sensor_definition(def).await.unwrap();

    // A retired definition rejects new assignments.
    let err = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation(_)));
}

#[tokio::test]
async fn retired_assignment_frees_its_pin() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    let (assignment, _) = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 4))
        .await
        .unwrap();
    assert!(!svc.free_pins(node).await.unwrap().contains(&4));

    svc.retire_sensor_assignment(assignment.id).await.unwrap();
    assert!(svc.free_pins(node).await.unwrap().contains(&4));
}

#[tokio::test]
async fn pin_move_is_revalidated() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;
    let def = seed_dht22(&svc).await;

    let (assignment, _) = svc
        .create_sensor_assignment(AssignmentSpec::new(def, node, 4))
        .await
        .unwrap();

    // Moving onto a flash pin fails and leaves the assignment untouched.
    let err = svc
        .update_sensor_assignment(
            assignment.id,
            AssignmentChanges {
                pin: Some(6),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::PinRejected { pin: 6, .. }));

    // A clean move succeeds and does not conflict with itself.
    let (updated, check) = svc
        .update_sensor_assignment(
            assignment.id,
            AssignmentChanges {
                pin: Some(13),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.pin, 13);
    assert!(check.unwrap().is_clear());

    // An alias-only edit skips pin validation entirely.
    let (updated, check) = svc
        .update_sensor_assignment(
            assignment.id,
            AssignmentChanges {
                alias: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.alias.as_deref(), Some("Renamed"));
    assert!(check.is_none());
}

#[tokio::test]
async fn unknown_node_and_definition_are_not_found() {
    let store = MemoryStore::new();
    let svc = service(&store);
    let node = seed_node(&svc).await;

    let err = svc
        .create_sensor_assignment(AssignmentSpec::new(99, node, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::NotFound(_)));

    let def = seed_dht22(&svc).await;
    let err = svc
        .create_sensor_assignment(AssignmentSpec::new(def, 99, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::NotFound(_)));
}

#[tokio::test]
async fn invalid_definition_specs_rejected() {
    let store = MemoryStore::new();
    let svc = service(&store);

    let mut spec = SensorDefinitionSpec::new("BMP280", SensorCategory::Pressure, Protocol::I2c);
    spec.range_min = Some(1100.0);
    spec.range_max = Some(300.0);
    let err = svc.create_sensor_definition(spec).await.unwrap_err();
    assert!(matches!(err, ModelError::Validation(_)));

    let err = svc
        .create_sensor_definition(SensorDefinitionSpec::new(
            "  ",
            SensorCategory::Light,
            Protocol::Analog,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation(_)));
}
