//! StorageActor — owns the `StorageBackend` trait object, batches sample
//! writes on a dual size/time trigger, and runs the retention sweep.
//!
//! CRUD for alerts/rules/maintenance-windows is low-volume and flushes
//! immediately rather than batching, unlike sample appends.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, error, trace, warn};

use super::messages::{SampleEvent, StorageCommand, StorageStats};
use crate::model::Sample;
use crate::store::StorageBackend;

const BATCH_SIZE_TRIGGER: usize = 100;
const BATCH_TIME_TRIGGER: Duration = Duration::from_secs(5);

pub struct StorageActor {
    backend: Box<dyn StorageBackend>,
    batch_buffer: Vec<(String, String, Sample)>,
    command_rx: mpsc::Receiver<StorageCommand>,
    sample_rx: broadcast::Receiver<SampleEvent>,
    flush_count: u64,
    retention_days: Option<u32>,
    cleanup_interval_hours: u32,
    last_cleanup_time: Option<chrono::DateTime<chrono::Utc>>,
    total_samples_deleted: u64,
}

impl StorageActor {
    pub fn new(
        backend: Box<dyn StorageBackend>,
        command_rx: mpsc::Receiver<StorageCommand>,
        sample_rx: broadcast::Receiver<SampleEvent>,
        retention_days: Option<u32>,
        cleanup_interval_hours: u32,
    ) -> Self {
        Self {
            backend,
            batch_buffer: Vec::with_capacity(BATCH_SIZE_TRIGGER),
            command_rx,
            sample_rx,
            flush_count: 0,
            retention_days,
            cleanup_interval_hours,
            last_cleanup_time: None,
            total_samples_deleted: 0,
        }
    }

    pub async fn run(mut self) {
        debug!("starting storage actor");

        let mut flush_interval = time::interval(BATCH_TIME_TRIGGER);
        let cleanup_duration = Duration::from_secs(self.cleanup_interval_hours as u64 * 3600);
        let mut cleanup_interval = time::interval(cleanup_duration);

        if self.retention_days.is_some() {
            self.run_cleanup().await;
        }

        loop {
            tokio::select! {
                result = self.sample_rx.recv() => {
                    match result {
                        Ok(event) => self.buffer_sample(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("storage actor lagged, skipped {skipped} samples");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("sample channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = flush_interval.tick() => {
                    if !self.batch_buffer.is_empty() {
                        trace!("time-based flush triggered ({} samples)", self.batch_buffer.len());
                        self.flush_batch().await;
                    }
                }

                _ = cleanup_interval.tick(), if self.retention_days.is_some() => {
                    debug!("retention cleanup triggered");
                    self.run_cleanup().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        if !self.batch_buffer.is_empty() {
            debug!("final flush before shutdown ({} samples)", self.batch_buffer.len());
            self.flush_batch().await;
        }

        if let Err(e) = self.backend.close().await {
            error!("error closing backend: {e}");
        }

        debug!("storage actor stopped");
    }

    async fn buffer_sample(&mut self, event: SampleEvent) {
        self.batch_buffer.push((event.target_name, event.instance_name, event.sample));
        if self.batch_buffer.len() >= BATCH_SIZE_TRIGGER {
            trace!("size-based flush triggered ({} samples)", self.batch_buffer.len());
            self.flush_batch().await;
        }
    }

    async fn flush_batch(&mut self) {
        if self.batch_buffer.is_empty() {
            return;
        }
        let batch_size = self.batch_buffer.len();
        let batch: Vec<_> = self.batch_buffer.drain(..).collect();

        match self.backend.append_samples_batch(&batch).await {
            Ok(()) => {
                self.flush_count += 1;
                trace!("flush #{} complete ({} samples)", self.flush_count, batch_size);
            }
            Err(e) => error!("failed to flush batch: {e}"),
        }
    }

    async fn run_cleanup(&mut self) {
        let Some(retention_days) = self.retention_days else {
            return;
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
        match self.backend.cleanup_old_samples(cutoff).await {
            Ok(deleted) => {
                debug!("retention cleanup deleted {deleted} samples older than {cutoff}");
                self.total_samples_deleted += deleted as u64;
                self.last_cleanup_time = Some(chrono::Utc::now());
            }
            Err(e) => error!("retention cleanup failed: {e}"),
        }
    }

    async fn handle_command(&mut self, cmd: StorageCommand) {
        match cmd {
            StorageCommand::Flush { respond_to } => {
                self.flush_batch().await;
                let _ = respond_to.send(Ok(()));
            }
            StorageCommand::GetStats { respond_to } => {
                let _ = respond_to.send(StorageStats {
                    buffer_size: self.batch_buffer.len(),
                    flush_count: self.flush_count,
                    last_cleanup_time: self.last_cleanup_time,
                    total_samples_deleted: self.total_samples_deleted,
                });
            }
            StorageCommand::QueryRange { query, respond_to } => {
                let result = self.backend.query_range(query).await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::GetAlertStats { respond_to } => {
                let result = self.backend.get_alert_stats().await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::ListAlerts {
                target,
                active_only,
                respond_to,
            } => {
                let result = self
                    .backend
                    .list_alerts(target.as_deref(), active_only)
                    .await
                    .map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::GetActiveAlertByRule {
                target,
                instance,
                rule,
                respond_to,
            } => {
                let result = self
                    .backend
                    .get_active_alert_by_rule(&target, &instance, &rule)
                    .await
                    .map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::SaveAlert { alert, respond_to } => {
                let result = self.backend.save_alert(&alert).await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::UpdateAlert { alert, respond_to } => {
                let result = self.backend.update_alert(&alert).await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::IsInMaintenanceWindow { target, now, respond_to } => {
                let result = self
                    .backend
                    .is_in_maintenance_window(&target, now)
                    .await
                    .map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::CreateRule { rule, respond_to } => {
                let result = self.backend.create_rule(&rule).await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::DeleteRule { name, respond_to } => {
                let result = self.backend.delete_rule(&name).await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::ListRules { respond_to } => {
                let result = self.backend.list_rules().await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::CreateMaintenanceWindow { window, respond_to } => {
                let result = self
                    .backend
                    .create_maintenance_window(&window)
                    .await
                    .map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::ListMaintenanceWindows { respond_to } => {
                let result = self.backend.list_maintenance_windows().await.map_err(|e| anyhow::anyhow!(e));
                let _ = respond_to.send(result);
            }
            StorageCommand::Shutdown => {}
        }
    }
}

/// A cloneable handle for sending commands to a running `StorageActor`.
#[derive(Clone)]
pub struct StoreHandle {
    command_tx: mpsc::Sender<StorageCommand>,
}

impl StoreHandle {
    pub fn new(command_tx: mpsc::Sender<StorageCommand>) -> Self {
        Self { command_tx }
    }

    pub async fn get_alert_stats(&self) -> anyhow::Result<crate::model::AlertStats> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(StorageCommand::GetAlertStats { respond_to }).await?;
        rx.await?
    }

    pub async fn get_active_alert_by_rule(
        &self,
        target: &str,
        instance: &str,
        rule: &str,
    ) -> anyhow::Result<Option<crate::model::Alert>> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx
            .send(StorageCommand::GetActiveAlertByRule {
                target: target.to_string(),
                instance: instance.to_string(),
                rule: rule.to_string(),
                respond_to,
            })
            .await?;
        rx.await?
    }

    pub async fn save_alert(&self, alert: crate::model::Alert) -> anyhow::Result<()> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(StorageCommand::SaveAlert { alert, respond_to }).await?;
        rx.await?
    }

    pub async fn update_alert(&self, alert: crate::model::Alert) -> anyhow::Result<()> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(StorageCommand::UpdateAlert { alert, respond_to }).await?;
        rx.await?
    }

    pub async fn is_in_maintenance_window(&self, target: &str, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<bool> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx
            .send(StorageCommand::IsInMaintenanceWindow {
                target: target.to_string(),
                now,
                respond_to,
            })
            .await?;
        rx.await?
    }

    pub async fn list_rules(&self) -> anyhow::Result<Vec<crate::model::AlertRule>> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(StorageCommand::ListRules { respond_to }).await?;
        rx.await?
    }

    pub async fn create_maintenance_window(&self, window: crate::model::MaintenanceWindow) -> anyhow::Result<()> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx
            .send(StorageCommand::CreateMaintenanceWindow { window, respond_to })
            .await?;
        rx.await?
    }

    pub async fn list_maintenance_windows(&self) -> anyhow::Result<Vec<crate::model::MaintenanceWindow>> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx
            .send(StorageCommand::ListMaintenanceWindows { respond_to })
            .await?;
        rx.await?
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(StorageCommand::Shutdown).await;
    }
}
