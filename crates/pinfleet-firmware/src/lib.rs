//! Deterministic Arduino sketch synthesis for fleet nodes.
//!
//! Takes a node and its active assignments and emits a complete `.ino`
//! sketch: pin defines, per-peripheral setup and read code, the telemetry
//! uplink and the command poll loop. The same inputs always produce the
//! same bytes, so regenerated firmware can be diffed and cached.

pub mod peripherals;
pub mod service;
pub mod synthesizer;

use thiserror::Error;

use pinfleet_model::ModelError;

/// Errors raised while assembling or rendering firmware.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The node record cannot produce a sketch (e.g. empty name).
    #[error("node {node_id} is not synthesizable: {reason}")]
    InvalidNode { node_id: i64, reason: String },

    /// An active assignment references a definition that no longer resolves.
    #[error("assignment {assignment_id} references unknown {kind} definition {definition_id}")]
    UnknownDefinition {
        assignment_id: i64,
        definition_id: i64,
        kind: &'static str,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub use peripherals::{
    ActuatorContext, ActuatorPeripheral, PeripheralRegistry, SensorContext, SensorPeripheral,
};
pub use service::FirmwareService;
pub use synthesizer::{sanitize_token, Firmware, FirmwareSynthesizer, SynthesisInput, Variant};
