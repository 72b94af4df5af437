//! Real-time telemetry and command fan-out for the fleet.
//!
//! The broker bridges persisted fleet state and the event bus: reference-
//! counted pollers stream sensor readings to subscribers, a health monitor
//! sweeps node heartbeats and publishes transitions, commands flow through
//! a persisted queue, and a retention sweeper prunes old telemetry.

pub mod broker;
pub mod health;
pub mod maintenance;

pub use broker::{NodeStatus, SensorSubscription, TelemetryBroker, DEFAULT_POLL_INTERVAL};
pub use health::{HealthMonitor, HeartbeatProbe, NodeHealthProbe, DEFAULT_SWEEP_INTERVAL};
pub use maintenance::{RetentionConfig, RetentionSweeper, SweepResult};
