//! Retention enforcement for telemetry and the command queue.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pinfleet_model::{ActuatorCommandRepository, ReadingRepository};

use crate::broker::now_ms;

const MS_PER_DAY: i64 = 86_400_000;

/// Retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Days of readings to keep; `None` keeps forever.
    pub reading_retention_days: Option<u32>,
    /// Days of issued commands to keep; `None` keeps forever.
    pub command_retention_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            reading_retention_days: Some(30),
            command_retention_days: Some(30),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub started_at: i64,
    pub completed_at: i64,
    pub readings_deleted: usize,
    pub commands_deleted: usize,
    pub errors: Vec<String>,
}

/// Hourly pruning of old readings and commands.
pub struct RetentionSweeper {
    config: RetentionConfig,
    readings: Arc<dyn ReadingRepository>,
    commands: Arc<dyn ActuatorCommandRepository>,
    running: Arc<RwLock<bool>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl RetentionSweeper {
    pub fn new(
        config: RetentionConfig,
        readings: Arc<dyn ReadingRepository>,
        commands: Arc<dyn ActuatorCommandRepository>,
    ) -> Self {
        Self {
            config,
            readings,
            commands,
            running: Arc::new(RwLock::new(false)),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the periodic sweep; disabled configs and repeat starts are
    /// no-ops.
    pub async fn start(&self) {
        if !self.config.enabled {
            return;
        }
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let readings = self.readings.clone();
        let commands = self.commands.clone();
        let config = self.config.clone();
        let running_flag = self.running.clone();
        let interval = Duration::from_secs(self.config.interval_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate tick so startup is not a sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !*running_flag.read().await {
                    break;
                }
                let result = Self::run_sweep(&readings, &commands, &config).await;
                info!(
                    readings_deleted = result.readings_deleted,
                    commands_deleted = result.commands_deleted,
                    errors = result.errors.len(),
                    "retention sweep finished"
                );
            }
        });

        *self.task_handle.write().await = Some(handle);
        info!(interval_secs = self.config.interval_secs, "retention sweeper started");
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.task_handle.write().await.take() {
            handle.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One sweep pass over both stores.
    pub async fn sweep_once(&self) -> SweepResult {
        Self::run_sweep(&self.readings, &self.commands, &self.config).await
    }

    async fn run_sweep(
        readings: &Arc<dyn ReadingRepository>,
        commands: &Arc<dyn ActuatorCommandRepository>,
        config: &RetentionConfig,
    ) -> SweepResult {
        let started_at = now_ms();
        let mut result = SweepResult {
            started_at,
            completed_at: 0,
            readings_deleted: 0,
            commands_deleted: 0,
            errors: Vec::new(),
        };

        if let Some(days) = config.reading_retention_days {
            let cutoff = started_at - i64::from(days) * MS_PER_DAY;
            match readings.delete_before(cutoff).await {
                Ok(count) => result.readings_deleted = count,
                Err(err) => {
                    warn!(error = %err, "reading retention failed");
                    result.errors.push(format!("readings: {err}"));
                }
            }
        }

        if let Some(days) = config.command_retention_days {
            let cutoff = started_at - i64::from(days) * MS_PER_DAY;
            match commands.delete_before(cutoff).await {
                Ok(count) => result.commands_deleted = count,
                Err(err) => {
                    warn!(error = %err, "command retention failed");
                    result.errors.push(format!("commands: {err}"));
                }
            }
        }

        result.completed_at = now_ms();
        result
    }
}
