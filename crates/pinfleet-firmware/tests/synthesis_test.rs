//! Sketch synthesis over the in-memory backend.

use pinfleet_firmware::{FirmwareService, SynthesisError, Variant};
use pinfleet_model::{
    ActuatorCategory, ActuatorDefinitionSpec, AssignmentSpec, NodeRepository, NodeSpec, Platform,
    Protocol, SensorAssignmentRepository, SensorCategory, SensorDefinitionSpec,
};
use pinfleet_storage::MemoryStore;

fn firmware_service(store: &MemoryStore) -> FirmwareService {
    FirmwareService::new(
        store.nodes.clone(),
        store.sensor_defs.clone(),
        store.actuator_defs.clone(),
        store.sensor_assignments.clone(),
        store.actuator_assignments.clone(),
    )
}

/// Node "Kitchen" with a DHT22 on GPIO 4, a light sensor on GPIO 34 and a
/// relay on GPIO 26.
async fn seed_kitchen(store: &MemoryStore) -> (i64, i64, i64, i64) {
    let svc = store.model_service();
    let node = svc
        .register_node(
            NodeSpec::new("Kitchen", Platform::Esp32)
                .with_location("kitchen")
                .with_firmware_version("1.4.0"),
        )
        .await
        .unwrap();

    let dht = svc
        .create_sensor_definition(
            SensorDefinitionSpec::new("DHT22", SensorCategory::Temperature, Protocol::OneWire)
                .with_unit("°C")
                .with_read_latency_ms(2_000),
        )
        .await
        .unwrap();
    let ldr = svc
        .create_sensor_definition(SensorDefinitionSpec::new(
            "LDR",
            SensorCategory::Light,
            Protocol::Analog,
        ))
        .await
        .unwrap();
    let relay = svc
        .create_actuator_definition(ActuatorDefinitionSpec::new(
            "Relay 1ch",
            ActuatorCategory::Relay,
            Protocol::Digital,
        ))
        .await
        .unwrap();

    let (ambient, _) = svc
        .create_sensor_assignment(AssignmentSpec::new(dht.id, node.id, 4).with_alias("Ambient"))
        .await
        .unwrap();
    let (light, _) = svc
        .create_sensor_assignment(AssignmentSpec::new(ldr.id, node.id, 34))
        .await
        .unwrap();
    let (pump, _) = svc
        .create_actuator_assignment(
            AssignmentSpec::new(relay.id, node.id, 26).with_alias("Pump"),
        )
        .await
        .unwrap();

    (node.id, ambient.id, light.id, pump.id)
}

#[tokio::test]
async fn kitchen_basic_sketch() {
    let store = MemoryStore::new();
    let (node_id, ambient_id, light_id, pump_id) = seed_kitchen(&store).await;

    let firmware = firmware_service(&store)
        .generate(node_id, Variant::Basic)
        .await
        .unwrap();

    assert_eq!(firmware.filename, "KITCHEN_firmware.ino");
    assert!(firmware.version.is_none());
    assert!(firmware.platformio_ini.is_none());

    let src = &firmware.source;
    assert!(src.contains(&format!("#define PIN_SENSOR_AMBIENT_{ambient_id} 4")));
    assert!(src.contains(&format!("#define PIN_SENSOR_LDR_{light_id} 34")));
    assert!(src.contains(&format!("#define PIN_ACTUATOR_PUMP_{pump_id} 26")));

    // DHT gets driver include, declaration, begin and a guarded read.
    assert!(src.contains("#include <DHT.h>"));
    assert!(src.contains(&format!(
        "DHT dht_AMBIENT_{ambient_id}(PIN_SENSOR_AMBIENT_{ambient_id}, DHT22);"
    )));
    assert!(src.contains(&format!("dht_AMBIENT_{ambient_id}.begin();")));
    assert!(src.contains(&format!("sendReading({ambient_id}, temp_AMBIENT_{ambient_id}, \"°C\")")));

    // The analog sensor samples with its category fallback unit.
    assert!(src.contains(&format!("analogRead(PIN_SENSOR_LDR_{light_id})")));
    assert!(src.contains(&format!("sendReading({light_id}, raw_LDR_{light_id}, \"lux\")")));

    // Actuators idle low.
    assert!(src.contains(&format!("pinMode(PIN_ACTUATOR_PUMP_{pump_id}, OUTPUT);")));
    assert!(src.contains(&format!("digitalWrite(PIN_ACTUATOR_PUMP_{pump_id}, LOW);")));

    // The fastest sensor drives the cadence, capped at five seconds.
    assert!(src.contains("#define SAMPLE_INTERVAL_MS 2000"));

    // No OTA machinery in the basic build.
    assert!(!src.contains("ArduinoOTA"));
    assert!(!src.contains("FIRMWARE_VERSION"));
}

#[tokio::test]
async fn synthesis_is_deterministic() {
    let store = MemoryStore::new();
    let (node_id, ..) = seed_kitchen(&store).await;
    let svc = firmware_service(&store);

    let first = svc.generate(node_id, Variant::Ota).await.unwrap();
    let second = svc.generate(node_id, Variant::Ota).await.unwrap();

    assert_eq!(first.source, second.source);
    assert_eq!(first.filename, second.filename);
    assert_eq!(first.version, second.version);
}

#[tokio::test]
async fn ota_variant_adds_update_machinery() {
    let store = MemoryStore::new();
    let (node_id, ..) = seed_kitchen(&store).await;

    let firmware = firmware_service(&store)
        .generate(node_id, Variant::Ota)
        .await
        .unwrap();

    assert_eq!(firmware.filename, "KITCHEN_OTA_firmware.ino");
    // Version comes from the node record, not the wall clock.
    assert_eq!(firmware.version.as_deref(), Some("1.4.0"));

    let src = &firmware.source;
    assert!(src.contains("#include <ArduinoOTA.h>"));
    assert!(src.contains("#include <HTTPUpdate.h>"));
    assert!(src.contains("#define FIRMWARE_VERSION \"1.4.0\""));
    assert!(src.contains("registerNode();"));
    assert!(src.contains("checkForUpdate();"));
    assert!(src.contains("startOtaUpdate();"));
    assert!(src.contains("#define OTA_CHECK_INTERVAL_MS 300000"));

    let ini = firmware.platformio_ini.unwrap();
    assert!(ini.contains("platform = espressif32"));
    assert!(ini.contains("upload_protocol = espota"));
}

#[tokio::test]
async fn esp8266_swaps_network_headers() {
    let store = MemoryStore::new();
    let svc = store.model_service();
    let node = svc
        .register_node(NodeSpec::new("Shed", Platform::Esp8266))
        .await
        .unwrap();

    let firmware = firmware_service(&store)
        .generate(node.id, Variant::Basic)
        .await
        .unwrap();

    assert!(firmware.source.contains("#include <ESP8266WiFi.h>"));
    assert!(!firmware.source.contains("#include <WiFi.h>"));
}

#[tokio::test]
async fn node_without_sensors_uses_default_cadence() {
    let store = MemoryStore::new();
    let svc = store.model_service();
    let node = svc
        .register_node(NodeSpec::new("Bare", Platform::Esp32))
        .await
        .unwrap();

    let firmware = firmware_service(&store)
        .generate(node.id, Variant::Basic)
        .await
        .unwrap();
    assert!(firmware.source.contains("#define SAMPLE_INTERVAL_MS 5000"));
}

#[tokio::test]
async fn dangling_definition_aborts_generation() {
    let store = MemoryStore::new();
    let svc = store.model_service();
    let node = svc
        .register_node(NodeSpec::new("Attic", Platform::Esp32))
        .await
        .unwrap();

    // Insert directly to fabricate a reference the catalog cannot resolve.
    store
        .sensor_assignments
        .insert(AssignmentSpec::new(999, node.id, 4))
        .await
        .unwrap();

    let err = firmware_service(&store)
        .generate(node.id, Variant::Basic)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SynthesisError::UnknownDefinition {
            definition_id: 999,
            kind: "sensor",
            ..
        }
    ));
}

#[tokio::test]
async fn blank_node_name_is_rejected() {
    let store = MemoryStore::new();
    // Bypass the model service's name validation.
    let node = store
        .nodes
        .insert(NodeSpec::new("  ", Platform::Esp32))
        .await
        .unwrap();

    let err = firmware_service(&store)
        .generate(node.id, Variant::Basic)
        .await
        .unwrap_err();
    assert!(matches!(err, SynthesisError::InvalidNode { .. }));
}

#[tokio::test]
async fn firmware_writes_sketch_and_project_file() {
    let store = MemoryStore::new();
    let (node_id, ..) = seed_kitchen(&store).await;
    let firmware = firmware_service(&store)
        .generate(node_id, Variant::Ota)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let sketch = firmware.write_to(dir.path()).unwrap();

    assert_eq!(sketch.file_name().unwrap(), "KITCHEN_OTA_firmware.ino");
    let on_disk = std::fs::read_to_string(&sketch).unwrap();
    assert_eq!(on_disk, firmware.source);
    assert!(dir.path().join("platformio.ini").exists());
}

#[tokio::test]
async fn unknown_node_is_not_found() {
    let store = MemoryStore::new();
    let err = firmware_service(&store)
        .generate(42, Variant::Basic)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SynthesisError::Model(pinfleet_model::ModelError::NotFound(_))
    ));
}
