//! Sketch rendering.
//!
//! Rendering is a pure function of the input: assignments are ordered by
//! pin then id, includes are emitted sorted, identifier tokens carry the
//! assignment id, and the OTA version comes from the node record. Running
//! the synthesizer twice over the same fleet state yields identical bytes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use pinfleet_model::{
    ActuatorAssignment, ActuatorDefinition, NetworkMode, Node, Platform, SensorAssignment,
    SensorCategory, SensorDefinition,
};

use crate::peripherals::{ActuatorContext, PeripheralRegistry, SensorContext};
use crate::SynthesisError;

/// Ceiling for the sampling cadence; sensors with a faster read latency
/// pull it down, slower ones never push it up.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 5_000;

/// How often OTA firmware checks the server for a new image.
pub const OTA_CHECK_INTERVAL_MS: u64 = 300_000;

const DEFAULT_SERVER_IP: &str = "192.168.1.100";
const SERVER_PORT: u16 = 4000;

/// Which firmware flavor to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Telemetry and command polling only.
    Basic,
    /// Adds self-registration, update checks and remote flashing.
    Ota,
}

/// Everything the renderer needs, already joined against the catalog.
#[derive(Debug, Clone)]
pub struct SynthesisInput {
    pub node: Node,
    pub sensors: Vec<(SensorAssignment, SensorDefinition)>,
    pub actuators: Vec<(ActuatorAssignment, ActuatorDefinition)>,
}

/// A rendered firmware artifact.
#[derive(Debug, Clone)]
pub struct Firmware {
    pub filename: String,
    pub source: String,
    /// Version baked into OTA builds; `None` for basic builds.
    pub version: Option<String>,
    /// PlatformIO project file, emitted for OTA builds.
    pub platformio_ini: Option<String>,
}

impl Firmware {
    pub fn size_bytes(&self) -> usize {
        self.source.len()
    }

    /// Write the sketch (and the project file, when present) into `dir`.
    /// Returns the sketch path.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.source)?;
        if let Some(ini) = &self.platformio_ini {
            std::fs::write(dir.join("platformio.ini"), ini)?;
        }
        Ok(path)
    }
}

/// Uppercase a name into a C identifier fragment: non-alphanumerics become
/// underscores and runs of underscores collapse.
pub fn sanitize_token(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.to_uppercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out
}

fn token_for(name: &str, assignment_id: i64) -> String {
    format!("{}_{}", sanitize_token(name), assignment_id)
}

fn unit_fallback(category: SensorCategory) -> &'static str {
    match category {
        SensorCategory::Temperature => "°C",
        SensorCategory::Humidity => "%",
        SensorCategory::Light => "lux",
        SensorCategory::Distance => "cm",
        SensorCategory::Pressure => "hPa",
        SensorCategory::Gas => "ppm",
        SensorCategory::Motion => "",
    }
}

/// Renders `.ino` sketches from joined fleet state.
pub struct FirmwareSynthesizer {
    registry: PeripheralRegistry,
}

impl FirmwareSynthesizer {
    pub fn new() -> Self {
        Self {
            registry: PeripheralRegistry::with_defaults(),
        }
    }

    /// Use a custom peripheral registry.
    pub fn with_registry(registry: PeripheralRegistry) -> Self {
        Self { registry }
    }

    pub fn synthesize(
        &self,
        input: &SynthesisInput,
        variant: Variant,
    ) -> Result<Firmware, SynthesisError> {
        let node = &input.node;
        if node.name.trim().is_empty() {
            return Err(SynthesisError::InvalidNode {
                node_id: node.id,
                reason: "node name is empty".to_string(),
            });
        }

        let mut sensors: Vec<&(SensorAssignment, SensorDefinition)> =
            input.sensors.iter().collect();
        sensors.sort_by_key(|(a, _)| (a.pin, a.id));
        let mut actuators: Vec<&(ActuatorAssignment, ActuatorDefinition)> =
            input.actuators.iter().collect();
        actuators.sort_by_key(|(a, _)| (a.pin, a.id));

        let sensor_ctxs: Vec<(SensorContext, &SensorDefinition)> = sensors
            .iter()
            .map(|(assignment, definition)| {
                let display_name = assignment
                    .alias
                    .clone()
                    .unwrap_or_else(|| definition.name.clone());
                let token = token_for(&display_name, assignment.id);
                (
                    SensorContext {
                        pin_define: format!("PIN_SENSOR_{token}"),
                        token,
                        pin: assignment.pin,
                        assignment_id: assignment.id,
                        display_name,
                        unit: definition
                            .unit
                            .clone()
                            .unwrap_or_else(|| unit_fallback(definition.category).to_string()),
                    },
                    definition,
                )
            })
            .collect();

        let actuator_ctxs: Vec<(ActuatorContext, &ActuatorDefinition)> = actuators
            .iter()
            .map(|(assignment, definition)| {
                let display_name = assignment
                    .alias
                    .clone()
                    .unwrap_or_else(|| definition.name.clone());
                let token = token_for(&display_name, assignment.id);
                (
                    ActuatorContext {
                        pin_define: format!("PIN_ACTUATOR_{token}"),
                        token,
                        pin: assignment.pin,
                        assignment_id: assignment.id,
                        display_name,
                    },
                    definition,
                )
            })
            .collect();

        let version = match variant {
            Variant::Ota => Some(
                node.firmware_version
                    .clone()
                    .unwrap_or_else(|| "0.0.0".to_string()),
            ),
            Variant::Basic => None,
        };

        let sample_interval = sample_interval_ms(&input.sensors);
        let includes = self.collect_includes(node.platform, variant, &sensor_ctxs);

        let mut src = String::new();
        self.render_header(&mut src, node, variant, version.as_deref());
        for include in &includes {
            src.push_str(&format!("#include <{include}>\n"));
        }
        src.push('\n');
        self.render_defines(
            &mut src,
            node,
            variant,
            version.as_deref(),
            sample_interval,
            &sensor_ctxs,
            &actuator_ctxs,
        );
        self.render_globals(&mut src, variant, &sensor_ctxs);
        self.render_setup(&mut src, node, variant, version.as_deref(), &sensor_ctxs, &actuator_ctxs);
        self.render_loop(&mut src, variant, &sensor_ctxs);
        self.render_helpers(&mut src, variant);
        if variant == Variant::Ota {
            self.render_ota_helpers(&mut src);
        }

        let node_token = sanitize_token(&node.name);
        let filename = match variant {
            Variant::Basic => format!("{node_token}_firmware.ino"),
            Variant::Ota => format!("{node_token}_OTA_firmware.ino"),
        };

        let platformio_ini = match variant {
            Variant::Ota => Some(render_platformio_ini(node)),
            Variant::Basic => None,
        };

        Ok(Firmware {
            filename,
            source: src,
            version,
            platformio_ini,
        })
    }

    fn collect_includes(
        &self,
        platform: Platform,
        variant: Variant,
        sensors: &[(SensorContext, &SensorDefinition)],
    ) -> BTreeSet<&'static str> {
        let mut includes: BTreeSet<&'static str> = BTreeSet::new();
        match platform {
            Platform::Esp32 | Platform::Esp32C3 => {
                includes.insert("WiFi.h");
                includes.insert("HTTPClient.h");
            }
            Platform::Esp8266 => {
                includes.insert("ESP8266WiFi.h");
                includes.insert("ESP8266HTTPClient.h");
            }
        }
        includes.insert("ArduinoJson.h");
        if variant == Variant::Ota {
            includes.insert("ArduinoOTA.h");
            match platform {
                Platform::Esp32 | Platform::Esp32C3 => includes.insert("HTTPUpdate.h"),
                Platform::Esp8266 => includes.insert("ESP8266httpUpdate.h"),
            };
        }
        for (_, definition) in sensors {
            if let Some(peripheral) = self
                .registry
                .sensor(definition.category, definition.protocol)
            {
                includes.extend(peripheral.includes.iter().copied());
            }
        }
        includes
    }

    fn render_header(&self, src: &mut String, node: &Node, variant: Variant, version: Option<&str>) {
        src.push_str("/*\n");
        let flavor = match variant {
            Variant::Basic => "",
            Variant::Ota => " (OTA)",
        };
        src.push_str(&format!(" * Auto-generated firmware{flavor} for {}\n", node.name));
        src.push_str(&format!(" * Platform: {}\n", node.platform));
        src.push_str(&format!(
            " * Location: {}\n",
            node.location.as_deref().unwrap_or("unspecified")
        ));
        src.push_str(&format!(
            " * MAC: {}\n",
            node.mac_address.as_deref().unwrap_or("auto")
        ));
        if let Some(version) = version {
            src.push_str(&format!(" * Version: {version}\n"));
        }
        src.push_str(" *\n * Do not edit by hand; regenerate from the fleet manager.\n */\n\n");
    }

    #[allow(clippy::too_many_arguments)]
    fn render_defines(
        &self,
        src: &mut String,
        node: &Node,
        variant: Variant,
        version: Option<&str>,
        sample_interval: u64,
        sensors: &[(SensorContext, &SensorDefinition)],
        actuators: &[(ActuatorContext, &ActuatorDefinition)],
    ) {
        let server_ip = node.ip_address.as_deref().unwrap_or(DEFAULT_SERVER_IP);
        src.push_str("// Server\n");
        src.push_str(&format!("#define SERVER_IP \"{server_ip}\"\n"));
        src.push_str(&format!("#define SERVER_PORT {SERVER_PORT}\n"));
        src.push_str(&format!("#define NODE_ID {}\n", node.id));
        src.push_str(&format!("#define NODE_NAME \"{}\"\n", node.name));
        if let Some(version) = version {
            src.push_str(&format!("#define FIRMWARE_VERSION \"{version}\"\n"));
        }
        src.push_str(&format!(
            "#define SAMPLE_INTERVAL_MS {sample_interval}\n"
        ));
        if variant == Variant::Ota {
            src.push_str(&format!(
                "#define OTA_CHECK_INTERVAL_MS {OTA_CHECK_INTERVAL_MS}\n"
            ));
        }
        src.push('\n');

        src.push_str("// WiFi\n");
        let (ssid, needs_edit) = match &node.network {
            NetworkMode::Wifi { ssid, .. } if !ssid.is_empty() => (ssid.as_str(), false),
            _ => ("YOUR_WIFI_SSID", true),
        };
        if needs_edit {
            src.push_str(&format!("#define WIFI_SSID \"{ssid}\"  // EDIT\n"));
        } else {
            src.push_str(&format!("#define WIFI_SSID \"{ssid}\"\n"));
        }
        src.push_str("#define WIFI_PASSWORD \"YOUR_WIFI_PASSWORD\"  // EDIT\n");
        if variant == Variant::Ota {
            src.push_str("#define OTA_PASSWORD \"YOUR_OTA_PASSWORD\"  // EDIT\n");
        }
        src.push('\n');

        src.push_str("// Sensor pins\n");
        for (ctx, _) in sensors {
            src.push_str(&format!("#define {} {}\n", ctx.pin_define, ctx.pin));
        }
        src.push_str("\n// Actuator pins\n");
        for (ctx, _) in actuators {
            src.push_str(&format!("#define {} {}\n", ctx.pin_define, ctx.pin));
        }
        src.push('\n');
    }

    fn render_globals(
        &self,
        src: &mut String,
        variant: Variant,
        sensors: &[(SensorContext, &SensorDefinition)],
    ) {
        src.push_str("// Globals\n");
        src.push_str("WiFiClient wifiClient;\n");
        src.push_str("unsigned long lastSample = 0;\n");
        if variant == Variant::Ota {
            src.push_str("unsigned long lastOtaCheck = 0;\n");
            src.push_str("bool otaInProgress = false;\n");
        }
        for (ctx, definition) in sensors {
            if let Some(peripheral) = self
                .registry
                .sensor(definition.category, definition.protocol)
            {
                if let Some(declare) = peripheral.declare {
                    src.push_str(&declare(ctx));
                }
            }
        }
        src.push('\n');
    }

    fn render_setup(
        &self,
        src: &mut String,
        node: &Node,
        variant: Variant,
        version: Option<&str>,
        sensors: &[(SensorContext, &SensorDefinition)],
        actuators: &[(ActuatorContext, &ActuatorDefinition)],
    ) {
        src.push_str("void setup() {\n");
        src.push_str("  Serial.begin(115200);\n");
        src.push_str(&format!(
            "  Serial.println(\"\\n=== Starting {} ===\");\n",
            node.name
        ));
        if let Some(version) = version {
            src.push_str(&format!("  Serial.println(\"Version: {version}\");\n"));
        }
        src.push_str("\n  setupWiFi();\n");
        if variant == Variant::Ota {
            src.push_str("  setupOta();\n");
        }
        src.push('\n');

        for (ctx, definition) in sensors {
            src.push_str(&format!(
                "  // Sensor: {} ({})\n",
                ctx.display_name, definition.category
            ));
            if let Some(peripheral) = self
                .registry
                .sensor(definition.category, definition.protocol)
            {
                src.push_str(&(peripheral.init)(ctx));
            }
            src.push('\n');
        }

        for (ctx, definition) in actuators {
            src.push_str(&format!(
                "  // Actuator: {} ({})\n",
                ctx.display_name, definition.category
            ));
            let peripheral = self
                .registry
                .actuator(definition.category, definition.protocol);
            src.push_str(&(peripheral.init)(ctx));
            src.push('\n');
        }

        if variant == Variant::Ota {
            src.push_str("  registerNode();\n\n");
        }
        src.push_str("  Serial.println(\"=== Node ready ===\");\n");
        src.push_str("}\n\n");
    }

    fn render_loop(
        &self,
        src: &mut String,
        variant: Variant,
        sensors: &[(SensorContext, &SensorDefinition)],
    ) {
        src.push_str("void loop() {\n");
        src.push_str("  if (WiFi.status() != WL_CONNECTED) {\n");
        src.push_str("    Serial.println(\"WiFi lost, reconnecting\");\n");
        src.push_str("    setupWiFi();\n");
        src.push_str("  }\n\n");

        if variant == Variant::Ota {
            src.push_str("  ArduinoOTA.handle();\n\n");
            src.push_str("  if (millis() - lastOtaCheck > OTA_CHECK_INTERVAL_MS) {\n");
            src.push_str("    checkForUpdate();\n");
            src.push_str("    lastOtaCheck = millis();\n");
            src.push_str("  }\n\n");
        }

        src.push_str("  if (millis() - lastSample > SAMPLE_INTERVAL_MS) {\n");
        src.push_str("    lastSample = millis();\n\n");
        for (ctx, definition) in sensors {
            if let Some(peripheral) = self
                .registry
                .sensor(definition.category, definition.protocol)
            {
                if let Some(read) = peripheral.read {
                    src.push_str(&format!("    // Read: {}\n", ctx.display_name));
                    src.push_str(&read(ctx));
                    src.push('\n');
                }
            }
        }
        src.push_str("  }\n\n");

        src.push_str("  processCommands();\n");
        src.push_str("  delay(SAMPLE_INTERVAL_MS);\n");
        src.push_str("}\n\n");
    }

    fn render_helpers(&self, src: &mut String, variant: Variant) {
        src.push_str(
            r#"void setupWiFi() {
  Serial.print("Connecting to WiFi");
  WiFi.begin(WIFI_SSID, WIFI_PASSWORD);

  int attempts = 0;
  while (WiFi.status() != WL_CONNECTED && attempts < 20) {
    delay(500);
    Serial.print(".");
    attempts++;
  }

  if (WiFi.status() == WL_CONNECTED) {
    Serial.print("\nWiFi connected, IP: ");
    Serial.println(WiFi.localIP());
  } else {
    Serial.println("\nWiFi connection failed");
  }
}

void sendReading(int assignmentId, float value, String unit) {
"#,
        );
        if variant == Variant::Ota {
            src.push_str("  if (WiFi.status() != WL_CONNECTED || otaInProgress) return;\n");
        } else {
            src.push_str("  if (WiFi.status() != WL_CONNECTED) return;\n");
        }
        src.push_str(
            r#"
  HTTPClient http;
  String url = "http://" + String(SERVER_IP) + ":" + String(SERVER_PORT) +
               "/api/sensor-assignments/" + String(assignmentId) + "/reading";

  http.begin(wifiClient, url);
  http.addHeader("Content-Type", "application/json");

  String payload = "{\"value\":" + String(value, 2) + ",\"unit\":\"" + unit + "\"}";
  int httpCode = http.POST(payload);

  if (httpCode > 0) {
    Serial.printf("Reading sent (id %d): %.2f %s [%d]\n", assignmentId, value, unit.c_str(), httpCode);
  } else {
    Serial.printf("Reading failed: %s\n", http.errorToString(httpCode).c_str());
  }

  http.end();
}

void processCommands() {
"#,
        );
        if variant == Variant::Ota {
            src.push_str("  if (WiFi.status() != WL_CONNECTED || otaInProgress) return;\n");
        } else {
            src.push_str("  if (WiFi.status() != WL_CONNECTED) return;\n");
        }
        src.push_str(
            r#"
  HTTPClient http;
  String url = "http://" + String(SERVER_IP) + ":" + String(SERVER_PORT) +
               "/api/nodes/" + String(NODE_ID) + "/pending-commands";

  http.begin(wifiClient, url);
  int httpCode = http.GET();

  if (httpCode == 200) {
    String payload = http.getString();
"#,
        );
        if variant == Variant::Ota {
            src.push_str(
                r#"    if (payload.indexOf("\"ota\"") > 0) {
      Serial.println("OTA command received");
      startOtaUpdate();
    }
"#,
            );
        }
        src.push_str("  }\n\n  http.end();\n}\n");
    }

    fn render_ota_helpers(&self, src: &mut String) {
        src.push_str(
            r#"
void setupOta() {
  ArduinoOTA.setHostname(NODE_NAME);
  ArduinoOTA.setPassword(OTA_PASSWORD);

  ArduinoOTA.onStart([]() {
    otaInProgress = true;
    Serial.println("OTA update starting");
  });
  ArduinoOTA.onEnd([]() {
    otaInProgress = false;
    Serial.println("\nOTA update complete");
  });
  ArduinoOTA.onError([](ota_error_t error) {
    otaInProgress = false;
    Serial.printf("OTA error %u\n", error);
  });

  ArduinoOTA.begin();
}

void registerNode() {
  if (WiFi.status() != WL_CONNECTED) return;

  HTTPClient http;
  String url = "http://" + String(SERVER_IP) + ":" + String(SERVER_PORT) +
               "/api/nodes/" + String(NODE_ID) + "/register";

  http.begin(wifiClient, url);
  http.addHeader("Content-Type", "application/json");

  String payload = "{\"name\":\"" + String(NODE_NAME) + "\",";
  payload += "\"firmwareVersion\":\"" + String(FIRMWARE_VERSION) + "\",";
  payload += "\"ipAddress\":\"" + WiFi.localIP().toString() + "\",";
  payload += "\"macAddress\":\"" + WiFi.macAddress() + "\"}";

  int httpCode = http.POST(payload);
  if (httpCode > 0) {
    Serial.println("Node registered");
  } else {
    Serial.println("Node registration failed");
  }

  http.end();
}

void checkForUpdate() {
  if (WiFi.status() != WL_CONNECTED || otaInProgress) return;

  HTTPClient http;
  String url = "http://" + String(SERVER_IP) + ":" + String(SERVER_PORT) +
               "/api/nodes/" + String(NODE_ID) + "/firmware-available";

  http.begin(wifiClient, url);
  int httpCode = http.GET();

  if (httpCode == 200) {
    String response = http.getString();
    if (response.indexOf("\"available\":true") > 0) {
      Serial.println("New firmware available");
    }
  }

  http.end();
}

void startOtaUpdate() {
  if (otaInProgress) return;
  otaInProgress = true;
  Serial.println("\n=== Starting OTA update ===");

  String firmwareUrl = "http://" + String(SERVER_IP) + ":" + String(SERVER_PORT) +
                       "/api/firmware/" + String(NODE_ID) + "/firmware.bin";

  WiFiClient client;
  t_httpUpdate_return ret = httpUpdate.update(client, firmwareUrl);

  switch (ret) {
    case HTTP_UPDATE_FAILED:
      Serial.printf("OTA failed: %s\n", httpUpdate.getLastErrorString().c_str());
      otaInProgress = false;
      break;
    case HTTP_UPDATE_NO_UPDATES:
      Serial.println("Already on the latest version");
      otaInProgress = false;
      break;
    case HTTP_UPDATE_OK:
      Serial.println("Update applied, rebooting");
      break;
  }
}
"#,
        );
    }
}

impl Default for FirmwareSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_interval_ms(sensors: &[(SensorAssignment, SensorDefinition)]) -> u64 {
    sensors
        .iter()
        .filter_map(|(_, definition)| definition.read_latency_ms)
        .fold(DEFAULT_SAMPLE_INTERVAL_MS, u64::min)
}

fn render_platformio_ini(node: &Node) -> String {
    let (platform, board, env) = match node.platform {
        Platform::Esp32 => ("espressif32", "esp32dev", "esp32dev"),
        Platform::Esp32C3 => ("espressif32", "esp32-c3-devkitm-1", "esp32c3"),
        Platform::Esp8266 => ("espressif8266", "d1_mini", "d1_mini"),
    };
    let upload_port = node.ip_address.as_deref().unwrap_or(DEFAULT_SERVER_IP);
    format!(
        r#"; PlatformIO project for {name}
; Auto-generated; regenerate from the fleet manager.

[env:{env}]
platform = {platform}
board = {board}
framework = arduino
monitor_speed = 115200

lib_deps =
    bblanchon/ArduinoJson@^6.21.0
    adafruit/DHT sensor library@^1.4.4
    adafruit/Adafruit Unified Sensor@^1.1.6

upload_protocol = espota
upload_port = {upload_port}
upload_flags =
    --port=3232
"#,
        name = node.name,
    )
}
