//! Node health sweeping.
//!
//! A background task probes every node on an interval and publishes a
//! `NodeHealthChanged` event only when the state actually transitions.
//! Operator-pinned `Maintenance` nodes are left alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pinfleet_core::{FleetEvent, SharedEventBus};
use pinfleet_model::{Node, NodeHealth, NodeRepository};

use crate::broker::now_ms;

/// Default sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Decides the current health of one node.
#[async_trait]
pub trait NodeHealthProbe: Send + Sync {
    async fn probe(&self, node: &Node) -> anyhow::Result<NodeHealth>;
}

/// Probe that declares a node offline when its heartbeat goes stale.
pub struct HeartbeatProbe {
    offline_after_ms: i64,
}

impl HeartbeatProbe {
    pub fn new(offline_after: Duration) -> Self {
        Self {
            offline_after_ms: i64::try_from(offline_after.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

impl Default for HeartbeatProbe {
    fn default() -> Self {
        // Three missed 30s heartbeats.
        Self::new(Duration::from_secs(90))
    }
}

#[async_trait]
impl NodeHealthProbe for HeartbeatProbe {
    async fn probe(&self, node: &Node) -> anyhow::Result<NodeHealth> {
        let stale = node.heartbeat_stale(now_ms(), self.offline_after_ms);
        Ok(if stale {
            NodeHealth::Offline
        } else {
            NodeHealth::Online
        })
    }
}

/// Periodic health sweeper.
pub struct HealthMonitor {
    nodes: Arc<dyn NodeRepository>,
    bus: SharedEventBus,
    probe: Arc<dyn NodeHealthProbe>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl HealthMonitor {
    pub fn new(nodes: Arc<dyn NodeRepository>, bus: SharedEventBus) -> Self {
        Self {
            nodes,
            bus,
            probe: Arc::new(HeartbeatProbe::default()),
            interval: DEFAULT_SWEEP_INTERVAL,
            running: Arc::new(RwLock::new(false)),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn NodeHealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background sweep; a second start is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let nodes = self.nodes.clone();
        let bus = self.bus.clone();
        let probe = self.probe.clone();
        let interval = self.interval;
        let running_flag = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !*running_flag.read().await {
                    break;
                }
                Self::sweep(&nodes, &bus, probe.as_ref()).await;
            }
        });

        *self.task_handle.write().await = Some(handle);
        info!(interval_secs = self.interval.as_secs(), "health monitor started");
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.task_handle.write().await.take() {
            handle.abort();
        }
        info!("health monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One sweep pass; exposed for tests and manual triggers.
    pub async fn sweep_once(&self) {
        Self::sweep(&self.nodes, &self.bus, self.probe.as_ref()).await;
    }

    /// Probe every node and publish transitions. A failing probe marks the
    /// node `Error` but never aborts the sweep.
    async fn sweep(nodes: &Arc<dyn NodeRepository>, bus: &SharedEventBus, probe: &dyn NodeHealthProbe) {
        let all = match nodes.list().await {
            Ok(all) => all,
            Err(err) => {
                warn!(error = %err, "health sweep could not list nodes");
                return;
            }
        };

        for node in all {
            if !node.health.is_sweepable() {
                continue;
            }

            let next = match probe.probe(&node).await {
                Ok(next) => next,
                Err(err) => {
                    warn!(node_id = node.id, error = %err, "health probe failed");
                    NodeHealth::Error
                }
            };

            if next == node.health {
                continue;
            }

            if let Err(err) = nodes.update_health(node.id, next).await {
                warn!(node_id = node.id, error = %err, "health update failed");
                continue;
            }

            info!(node_id = node.id, from = %node.health, to = %next, "node health changed");
            bus.publish_with_source(
                FleetEvent::NodeHealthChanged {
                    node_id: node.id,
                    node_name: node.name.clone(),
                    previous: node.health.to_string(),
                    current: next.to_string(),
                    timestamp: now_ms(),
                },
                "health",
            );
        }
    }
}
