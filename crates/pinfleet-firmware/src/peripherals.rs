//! Capability-keyed peripheral code fragments.
//!
//! Each supported `(category, protocol)` pair maps to the sketch fragments
//! a peripheral needs: extra includes, a global declaration, setup code and
//! loop-body read code. Pairs without an entry still get their pin define,
//! but contribute no setup or read lines.

use std::collections::HashMap;

use pinfleet_model::{ActuatorCategory, Protocol, SensorCategory};

/// Render context for one sensor assignment.
#[derive(Debug, Clone)]
pub struct SensorContext {
    /// Collision-proof identifier token, e.g. `AMBIENT_7`.
    pub token: String,
    /// Name of the pin define, e.g. `PIN_SENSOR_AMBIENT_7`.
    pub pin_define: String,
    pub pin: u8,
    pub assignment_id: i64,
    pub display_name: String,
    pub unit: String,
}

/// Render context for one actuator assignment.
#[derive(Debug, Clone)]
pub struct ActuatorContext {
    pub token: String,
    pub pin_define: String,
    pub pin: u8,
    pub assignment_id: i64,
    pub display_name: String,
}

/// Sketch fragments for one sensor capability.
#[derive(Clone, Copy)]
pub struct SensorPeripheral {
    pub includes: &'static [&'static str],
    /// Global declaration, e.g. a driver object.
    pub declare: Option<fn(&SensorContext) -> String>,
    /// Lines inside `setup()`.
    pub init: fn(&SensorContext) -> String,
    /// Lines inside the sampling block of `loop()`.
    pub read: Option<fn(&SensorContext) -> String>,
}

/// Sketch fragments for one actuator capability.
#[derive(Clone, Copy)]
pub struct ActuatorPeripheral {
    pub includes: &'static [&'static str],
    pub init: fn(&ActuatorContext) -> String,
}

fn dht_declare(ctx: &SensorContext) -> String {
    format!("DHT dht_{}({}, DHT22);\n", ctx.token, ctx.pin_define)
}

fn dht_init(ctx: &SensorContext) -> String {
    format!(
        "  dht_{token}.begin();\n  Serial.println(\"DHT ready on GPIO {pin}\");\n",
        token = ctx.token,
        pin = ctx.pin
    )
}

fn dht_temperature_read(ctx: &SensorContext) -> String {
    format!(
        "    float temp_{token} = dht_{token}.readTemperature();\n    if (!isnan(temp_{token})) {{\n      sendReading({id}, temp_{token}, \"{unit}\");\n    }}\n",
        token = ctx.token,
        id = ctx.assignment_id,
        unit = ctx.unit
    )
}

fn dht_humidity_read(ctx: &SensorContext) -> String {
    format!(
        "    float hum_{token} = dht_{token}.readHumidity();\n    if (!isnan(hum_{token})) {{\n      sendReading({id}, hum_{token}, \"{unit}\");\n    }}\n",
        token = ctx.token,
        id = ctx.assignment_id,
        unit = ctx.unit
    )
}

fn input_pin_init(ctx: &SensorContext) -> String {
    format!(
        "  pinMode({define}, INPUT);\n  Serial.println(\"{name} ready on GPIO {pin}\");\n",
        define = ctx.pin_define,
        name = ctx.display_name,
        pin = ctx.pin
    )
}

fn analog_read(ctx: &SensorContext) -> String {
    format!(
        "    int raw_{token} = analogRead({define});\n    sendReading({id}, raw_{token}, \"{unit}\");\n",
        token = ctx.token,
        define = ctx.pin_define,
        id = ctx.assignment_id,
        unit = ctx.unit
    )
}

fn digital_read(ctx: &SensorContext) -> String {
    format!(
        "    int state_{token} = digitalRead({define});\n    sendReading({id}, state_{token}, \"{unit}\");\n",
        token = ctx.token,
        define = ctx.pin_define,
        id = ctx.assignment_id,
        unit = ctx.unit
    )
}

fn output_low_init(ctx: &ActuatorContext) -> String {
    format!(
        "  pinMode({define}, OUTPUT);\n  digitalWrite({define}, LOW);\n  Serial.println(\"{name} ready on GPIO {pin}\");\n",
        define = ctx.pin_define,
        name = ctx.display_name,
        pin = ctx.pin
    )
}

const DEFAULT_ACTUATOR: ActuatorPeripheral = ActuatorPeripheral {
    includes: &[],
    init: output_low_init,
};

/// Registry mapping capabilities to their sketch fragments.
pub struct PeripheralRegistry {
    sensors: HashMap<(SensorCategory, Protocol), SensorPeripheral>,
    actuators: HashMap<(ActuatorCategory, Protocol), ActuatorPeripheral>,
}

impl PeripheralRegistry {
    /// Empty registry; every peripheral falls back to define-only (sensors)
    /// or plain digital output (actuators).
    pub fn empty() -> Self {
        Self {
            sensors: HashMap::new(),
            actuators: HashMap::new(),
        }
    }

    /// Registry with the built-in peripherals.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_sensor(
            SensorCategory::Temperature,
            Protocol::OneWire,
            SensorPeripheral {
                includes: &["DHT.h"],
                declare: Some(dht_declare),
                init: dht_init,
                read: Some(dht_temperature_read),
            },
        );
        registry.register_sensor(
            SensorCategory::Humidity,
            Protocol::OneWire,
            SensorPeripheral {
                includes: &["DHT.h"],
                declare: Some(dht_declare),
                init: dht_init,
                read: Some(dht_humidity_read),
            },
        );
        registry.register_sensor(
            SensorCategory::Light,
            Protocol::Analog,
            SensorPeripheral {
                includes: &[],
                declare: None,
                init: input_pin_init,
                read: Some(analog_read),
            },
        );
        registry.register_sensor(
            SensorCategory::Motion,
            Protocol::Digital,
            SensorPeripheral {
                includes: &[],
                declare: None,
                init: input_pin_init,
                read: Some(digital_read),
            },
        );
        // Ultrasonic rangers need trigger/echo orchestration the sketch
        // does not model yet; configure the pin and leave sampling out.
        registry.register_sensor(
            SensorCategory::Distance,
            Protocol::Digital,
            SensorPeripheral {
                includes: &[],
                declare: None,
                init: input_pin_init,
                read: None,
            },
        );
        registry
    }

    pub fn register_sensor(
        &mut self,
        category: SensorCategory,
        protocol: Protocol,
        peripheral: SensorPeripheral,
    ) {
        self.sensors.insert((category, protocol), peripheral);
    }

    pub fn register_actuator(
        &mut self,
        category: ActuatorCategory,
        protocol: Protocol,
        peripheral: ActuatorPeripheral,
    ) {
        self.actuators.insert((category, protocol), peripheral);
    }

    pub fn sensor(
        &self,
        category: SensorCategory,
        protocol: Protocol,
    ) -> Option<&SensorPeripheral> {
        self.sensors.get(&(category, protocol))
    }

    /// Fragments for an actuator capability; unregistered pairs drive the
    /// pin as a plain low-idle digital output.
    pub fn actuator(&self, category: ActuatorCategory, protocol: Protocol) -> &ActuatorPeripheral {
        self.actuators
            .get(&(category, protocol))
            .unwrap_or(&DEFAULT_ACTUATOR)
    }
}

impl Default for PeripheralRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SensorContext {
        SensorContext {
            token: "AMBIENT_7".to_string(),
            pin_define: "PIN_SENSOR_AMBIENT_7".to_string(),
            pin: 4,
            assignment_id: 7,
            display_name: "Ambient".to_string(),
            unit: "°C".to_string(),
        }
    }

    #[test]
    fn dht_fragments_reference_the_token() {
        let registry = PeripheralRegistry::with_defaults();
        let dht = registry
            .sensor(SensorCategory::Temperature, Protocol::OneWire)
            .unwrap();
        let ctx = ctx();

        let declare = (dht.declare.unwrap())(&ctx);
        assert!(declare.contains("DHT dht_AMBIENT_7(PIN_SENSOR_AMBIENT_7, DHT22)"));

        let read = (dht.read.unwrap())(&ctx);
        assert!(read.contains("readTemperature"));
        assert!(read.contains("sendReading(7"));
        assert!(read.contains("isnan"));
    }

    #[test]
    fn unknown_sensor_capability_has_no_entry() {
        let registry = PeripheralRegistry::with_defaults();
        assert!(registry
            .sensor(SensorCategory::Gas, Protocol::Uart)
            .is_none());
    }

    #[test]
    fn actuators_fall_back_to_digital_output() {
        let registry = PeripheralRegistry::with_defaults();
        let relay = registry.actuator(ActuatorCategory::Relay, Protocol::Digital);
        let init = (relay.init)(&ActuatorContext {
            token: "PUMP_3".to_string(),
            pin_define: "PIN_ACTUATOR_PUMP_3".to_string(),
            pin: 26,
            assignment_id: 3,
            display_name: "Pump".to_string(),
        });
        assert!(init.contains("pinMode(PIN_ACTUATOR_PUMP_3, OUTPUT)"));
        assert!(init.contains("digitalWrite(PIN_ACTUATOR_PUMP_3, LOW)"));
    }
}
