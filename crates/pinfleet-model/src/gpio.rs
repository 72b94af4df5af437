//! Per-platform GPIO maps and pin validation.
//!
//! Every platform gets a static pin table classifying each GPIO. Validation
//! distinguishes hard rejections (flash/UART pins, output on an input-only
//! pin) from advisory warnings (strapping pins, already-occupied pins);
//! warnings never block an assignment.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{AssignmentId, DeviceKind};
use crate::error::{ModelError, Result};
use crate::node::Platform;

/// Hardware classification of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinClass {
    /// General-purpose input/output.
    UsableIo,
    /// Readable only; actuators are rejected here.
    InputOnly,
    /// Reserved for flash or the boot console, never assignable.
    Restricted,
    /// Usable, but sampled at boot; a wrong level can brick the boot.
    Strapping,
}

/// Static description of one GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinInfo {
    pub pin: u8,
    pub class: PinClass,
    pub label: &'static str,
    pub alt_functions: &'static [&'static str],
    pub note: &'static str,
}

const fn pin(
    pin: u8,
    class: PinClass,
    label: &'static str,
    alt_functions: &'static [&'static str],
    note: &'static str,
) -> PinInfo {
    PinInfo {
        pin,
        class,
        label,
        alt_functions,
        note,
    }
}

use self::PinClass::{InputOnly, Restricted, Strapping, UsableIo};

static ESP32_PINS: &[PinInfo] = &[
    pin(0, Strapping, "GPIO0", &["Boot", "ADC2_CH1", "Touch1"], "strapping pin"),
    pin(1, Restricted, "TX0", &["UART0 TX", "CLK_OUT3"], "serial console"),
    pin(2, Strapping, "GPIO2", &["ADC2_CH2", "Touch2"], "strapping pin, onboard LED"),
    pin(3, Restricted, "RX0", &["UART0 RX", "CLK_OUT2"], "serial console"),
    pin(4, UsableIo, "GPIO4", &["ADC2_CH0", "Touch0"], ""),
    pin(5, Strapping, "GPIO5", &["VSPI_SS"], "strapping pin"),
    pin(6, Restricted, "SCK", &["Flash CLK"], "flash interface"),
    pin(7, Restricted, "SDO", &["Flash D0"], "flash interface"),
    pin(8, Restricted, "SDI", &["Flash D1"], "flash interface"),
    pin(9, Restricted, "SHD", &["Flash D2"], "flash interface"),
    pin(10, Restricted, "SWP", &["Flash D3"], "flash interface"),
    pin(11, Restricted, "CSC", &["Flash CMD"], "flash interface"),
    pin(12, Strapping, "GPIO12", &["ADC2_CH5", "Touch5", "HSPI_MISO"], "strapping pin"),
    pin(13, UsableIo, "GPIO13", &["ADC2_CH4", "Touch4", "HSPI_MOSI"], ""),
    pin(14, UsableIo, "GPIO14", &["ADC2_CH6", "Touch6", "HSPI_CLK"], ""),
    pin(15, Strapping, "GPIO15", &["ADC2_CH3", "Touch3", "HSPI_SS"], "strapping pin"),
    pin(16, UsableIo, "GPIO16", &["UART2 RX"], "unavailable with PSRAM"),
    pin(17, UsableIo, "GPIO17", &["UART2 TX"], "unavailable with PSRAM"),
    pin(18, UsableIo, "GPIO18", &["VSPI_SCK"], ""),
    pin(19, UsableIo, "GPIO19", &["VSPI_MISO"], ""),
    pin(21, UsableIo, "GPIO21", &["I2C_SDA"], ""),
    pin(22, UsableIo, "GPIO22", &["I2C_SCL"], ""),
    pin(23, UsableIo, "GPIO23", &["VSPI_MOSI"], ""),
    pin(25, UsableIo, "GPIO25", &["ADC2_CH8", "DAC1"], ""),
    pin(26, UsableIo, "GPIO26", &["ADC2_CH9", "DAC2"], ""),
    pin(27, UsableIo, "GPIO27", &["ADC2_CH7", "Touch7"], ""),
    pin(32, UsableIo, "GPIO32", &["ADC1_CH4", "Touch9"], ""),
    pin(33, UsableIo, "GPIO33", &["ADC1_CH5", "Touch8"], ""),
    pin(34, InputOnly, "GPIO34", &["ADC1_CH6"], "input only"),
    pin(35, InputOnly, "GPIO35", &["ADC1_CH7"], "input only"),
    pin(36, InputOnly, "VP", &["ADC1_CH0", "GPIO36"], "input only"),
    pin(39, InputOnly, "VN", &["ADC1_CH3", "GPIO39"], "input only"),
];

static ESP32C3_PINS: &[PinInfo] = &[
    pin(0, UsableIo, "GPIO0", &["ADC1_CH0", "XTAL_32K_P"], ""),
    pin(1, UsableIo, "GPIO1", &["ADC1_CH1", "XTAL_32K_N"], ""),
    pin(2, Strapping, "GPIO2", &["ADC1_CH2", "FSPIQ"], "strapping pin"),
    pin(3, UsableIo, "GPIO3", &["ADC1_CH3"], ""),
    pin(4, UsableIo, "GPIO4", &["ADC1_CH4", "FSPIHD"], ""),
    pin(5, UsableIo, "GPIO5", &["ADC2_CH0", "FSPIWP"], ""),
    pin(6, UsableIo, "GPIO6", &["FSPICLK"], ""),
    pin(7, UsableIo, "GPIO7", &["FSPID"], ""),
    pin(8, Strapping, "GPIO8", &["Boot mode"], "strapping pin"),
    pin(9, Strapping, "GPIO9", &["Boot mode"], "strapping pin"),
    pin(10, UsableIo, "GPIO10", &["FSPICS0"], ""),
    pin(11, Restricted, "GPIO11", &["VDD_SPI"], "flash power"),
    pin(12, Restricted, "GPIO12", &["SPIHD"], "flash interface"),
    pin(13, Restricted, "GPIO13", &["SPIWP"], "flash interface"),
    pin(14, Restricted, "GPIO14", &["SPICS0"], "flash interface"),
    pin(15, Restricted, "GPIO15", &["SPICLK"], "flash interface"),
    pin(16, Restricted, "GPIO16", &["SPID"], "flash interface"),
    pin(17, Restricted, "GPIO17", &["SPIQ"], "flash interface"),
    pin(18, UsableIo, "GPIO18", &["USB_D-"], "shared with USB"),
    pin(19, UsableIo, "GPIO19", &["USB_D+"], "shared with USB"),
    pin(20, Restricted, "RX0", &["UART0 RX"], "serial console"),
    pin(21, Restricted, "TX0", &["UART0 TX"], "serial console"),
];

static ESP8266_PINS: &[PinInfo] = &[
    pin(0, Strapping, "GPIO0", &["Boot mode"], "strapping pin"),
    pin(1, Restricted, "TX0", &["UART0 TX"], "serial console"),
    pin(2, Strapping, "GPIO2", &["UART1 TX"], "strapping pin, onboard LED"),
    pin(3, Restricted, "RX0", &["UART0 RX"], "serial console"),
    pin(4, UsableIo, "GPIO4", &["I2C_SDA"], ""),
    pin(5, UsableIo, "GPIO5", &["I2C_SCL"], ""),
    pin(6, Restricted, "SCK", &["Flash CLK"], "flash interface"),
    pin(7, Restricted, "SDO", &["Flash D0"], "flash interface"),
    pin(8, Restricted, "SDI", &["Flash D1"], "flash interface"),
    pin(9, Restricted, "SHD", &["Flash D2"], "flash interface"),
    pin(10, Restricted, "SWP", &["Flash D3"], "flash interface"),
    pin(11, Restricted, "CSC", &["Flash CMD"], "flash interface"),
    pin(12, UsableIo, "GPIO12", &["HSPI_MISO"], ""),
    pin(13, UsableIo, "GPIO13", &["HSPI_MOSI"], ""),
    pin(14, UsableIo, "GPIO14", &["HSPI_CLK"], ""),
    pin(15, Strapping, "GPIO15", &["HSPI_SS"], "strapping pin, pulled low"),
    pin(16, UsableIo, "GPIO16", &["Wake"], "no interrupts"),
];

fn pin_table(platform: Platform) -> &'static [PinInfo] {
    match platform {
        Platform::Esp32 => ESP32_PINS,
        Platform::Esp32C3 => ESP32C3_PINS,
        Platform::Esp8266 => ESP8266_PINS,
    }
}

/// Look up the static description of a pin.
pub fn pin_info(platform: Platform, pin: u8) -> Option<&'static PinInfo> {
    pin_table(platform).iter().find(|info| info.pin == pin)
}

/// Classify a pin. Pins absent from the platform table are treated as
/// restricted rather than assignable.
pub fn classify_pin(platform: Platform, pin: u8) -> PinClass {
    pin_info(platform, pin)
        .map(|info| info.class)
        .unwrap_or(PinClass::Restricted)
}

/// An active assignment currently holding a pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinOccupant {
    pub assignment_id: AssignmentId,
    pub kind: DeviceKind,
    pub alias: Option<String>,
}

/// Outcome of validating a pin for an assignment.
///
/// Construction implies the pin is assignable; `caution` and `conflicts`
/// are advisory and the caller decides whether to heed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinCheck {
    pub pin: u8,
    pub class: PinClass,
    pub caution: Option<String>,
    pub conflicts: Vec<PinOccupant>,
}

impl PinCheck {
    /// No caution and no conflicting occupants.
    pub fn is_clear(&self) -> bool {
        self.caution.is_none() && self.conflicts.is_empty()
    }
}

/// Validate a pin for a prospective assignment.
///
/// Restricted pins and actuators on input-only pins are hard errors.
/// Everything else passes, with strapping cautions and current occupants
/// reported in the returned [`PinCheck`].
pub fn validate_assignment(
    platform: Platform,
    pin: u8,
    kind: DeviceKind,
    occupants: &[PinOccupant],
) -> Result<PinCheck> {
    let class = classify_pin(platform, pin);
    let info = pin_info(platform, pin);

    match class {
        PinClass::Restricted => {
            let reason = match info {
                Some(info) if !info.note.is_empty() => {
                    format!("reserved on {platform} ({})", info.note)
                }
                _ => format!("not assignable on {platform}"),
            };
            return Err(ModelError::PinRejected { pin, reason });
        }
        PinClass::InputOnly if kind == DeviceKind::Actuator => {
            return Err(ModelError::PinRejected {
                pin,
                reason: format!("input-only on {platform}, cannot drive an actuator"),
            });
        }
        _ => {}
    }

    let caution = match class {
        PinClass::Strapping => Some(format!(
            "GPIO {pin} is a strapping pin; a held level at reset can change the boot mode"
        )),
        _ => None,
    };

    Ok(PinCheck {
        pin,
        class,
        caution,
        conflicts: occupants.to_vec(),
    })
}

/// Pins claimed by more than one pool.
///
/// Each slice is one pool of claimed pins (e.g. sensor pins, actuator
/// pins); a pin appearing in two pools, or twice in one, is a conflict.
pub fn compute_conflicts(pools: &[&[u8]]) -> BTreeSet<u8> {
    let mut seen = BTreeSet::new();
    let mut conflicts = BTreeSet::new();
    for pool in pools {
        for &pin in *pool {
            if !seen.insert(pin) {
                conflicts.insert(pin);
            }
        }
    }
    conflicts
}

/// Assignable pins not currently occupied, in ascending order.
///
/// Strapping and input-only pins count as free; restricted pins never do.
pub fn free_pins(platform: Platform, occupied: &[u8]) -> Vec<u8> {
    pin_table(platform)
        .iter()
        .filter(|info| info.class != PinClass::Restricted)
        .map(|info| info.pin)
        .filter(|pin| !occupied.contains(pin))
        .collect()
}
