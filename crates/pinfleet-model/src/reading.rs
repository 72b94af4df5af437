//! Telemetry readings and actuator commands.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::AssignmentId;

/// One persisted sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub assignment_id: AssignmentId,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    /// Unix millis at capture time.
    pub timestamp: i64,
}

/// Delivery state of a queued actuator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Queued, not yet picked up by the node.
    Pending,
    /// Handed to the node.
    Dispatched,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Dispatched => "dispatched",
        };
        write!(f, "{s}")
    }
}

/// A command issued against an actuator assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub id: i64,
    pub actuator_id: AssignmentId,
    /// Free-form payload interpreted by the firmware (e.g. `{"state": "on"}`).
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    /// Unix millis when the command was enqueued.
    pub issued_at: i64,
}
