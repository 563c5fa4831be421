//! SupervisorActor — owns the set of running Scrapers, diffs them against
//! each `ApplyConfig`, and pumps every `SampleEvent` from its target's
//! drop-oldest queue onward to Store and Alert Engine subscribers.
//!
//! Grounded on `bin/hub.rs`'s `run_monitoring()`: a write-guarded map of
//! per-target handles, diffed by name then by deep-equality of the target
//! spec, with starts happening before stops on reload so sample flow never
//! has a gap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::dropqueue::DropOldestQueue;
use super::messages::{SampleEvent, ScraperCommand, SupervisorCommand, SupervisorStats, TargetStatusEvent};
use super::scraper::ScraperActor;
use crate::config::ResolvedConfig;
use crate::model::Target;

struct RunningTarget {
    target: Target,
    command_tx: mpsc::Sender<ScraperCommand>,
    scraper_handle: JoinHandle<()>,
    pump_handle: JoinHandle<()>,
}

pub struct SupervisorActor {
    targets: HashMap<String, RunningTarget>,
    command_rx: mpsc::Receiver<SupervisorCommand>,
    sample_tx: broadcast::Sender<SampleEvent>,
    status_tx: broadcast::Sender<TargetStatusEvent>,
    samples_dropped: Arc<AtomicU64>,
    samples_routed: Arc<AtomicU64>,
}

impl SupervisorActor {
    pub fn new(
        command_rx: mpsc::Receiver<SupervisorCommand>,
        sample_tx: broadcast::Sender<SampleEvent>,
        status_tx: broadcast::Sender<TargetStatusEvent>,
    ) -> Self {
        Self {
            targets: HashMap::new(),
            command_rx,
            sample_tx,
            status_tx,
            samples_dropped: Arc::new(AtomicU64::new(0)),
            samples_routed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run(mut self) {
        debug!("starting supervisor actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SupervisorCommand::ApplyConfig { config, respond_to } => {
                    let result = self.apply_config(config).await;
                    let _ = respond_to.send(result);
                }
                SupervisorCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(SupervisorStats {
                        running_targets: self.targets.len(),
                        samples_routed: self.samples_routed.load(Ordering::Relaxed),
                        samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
                    });
                }
                SupervisorCommand::Shutdown { respond_to } => {
                    self.shutdown_all().await;
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        debug!("supervisor actor stopped");
    }

    /// Diff the incoming target set against the running one by name, then
    /// by deep-equality for the overlap. Starts happen before stops so
    /// sample flow stays continuous across a reload, per `SPEC_FULL.md` §4.3.
    async fn apply_config(&mut self, config: ResolvedConfig) -> anyhow::Result<()> {
        let incoming: HashMap<String, Target> = config.targets.into_iter().map(|t| (t.name.clone(), t)).collect();

        let added: Vec<Target> = incoming
            .values()
            .filter(|t| !self.targets.contains_key(&t.name))
            .cloned()
            .collect();
        let changed: Vec<Target> = incoming
            .values()
            .filter(|t| self.targets.get(&t.name).is_some_and(|running| &running.target != *t))
            .cloned()
            .collect();
        let removed: Vec<String> = self
            .targets
            .keys()
            .filter(|name| !incoming.contains_key(*name))
            .cloned()
            .collect();

        for target in added {
            info!("starting scraper for target '{}'", target.name);
            self.start_target(target).await;
        }

        for target in changed {
            if let Some(running) = self.targets.get_mut(&target.name) {
                debug!("reconfiguring target '{}'", target.name);
                let _ = running
                    .command_tx
                    .send(ScraperCommand::Reconfigure { target: target.clone() })
                    .await;
                running.target = target;
            }
        }

        for name in removed {
            info!("stopping scraper for target '{}'", name);
            self.stop_target(&name).await;
        }

        Ok(())
    }

    async fn start_target(&mut self, target: Target) {
        let name = target.name.clone();
        let queue = Arc::new(DropOldestQueue::new(16));
        let (command_tx, command_rx) = mpsc::channel(8);

        let scraper = ScraperActor::new(
            target.clone(),
            command_rx,
            queue.clone(),
            self.status_tx.clone(),
            self.samples_dropped.clone(),
        );
        let scraper_handle = tokio::spawn(scraper.run());

        let sample_tx = self.sample_tx.clone();
        let samples_routed = self.samples_routed.clone();
        let pump_queue = queue.clone();
        let pump_handle = tokio::spawn(async move {
            loop {
                let event = pump_queue.pop().await;
                if sample_tx.send(event).is_ok() {
                    samples_routed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        self.targets.insert(
            name,
            RunningTarget {
                target,
                command_tx,
                scraper_handle,
                pump_handle,
            },
        );
    }

    async fn stop_target(&mut self, name: &str) {
        let Some(running) = self.targets.remove(name) else {
            return;
        };
        let _ = running.command_tx.send(ScraperCommand::Shutdown).await;
        let _ = running.scraper_handle.await;
        // The pump task has no graceful drain point (it blocks forever on
        // an empty queue); abort it once its Scraper has stopped feeding it.
        running.pump_handle.abort();
    }

    async fn shutdown_all(&mut self) {
        let names: Vec<String> = self.targets.keys().cloned().collect();
        for name in names {
            self.stop_target(&name).await;
        }
    }
}

/// A cloneable handle for sending commands to a running `SupervisorActor`.
#[derive(Clone)]
pub struct SupervisorHandle {
    command_tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub fn new(command_tx: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { command_tx }
    }

    pub async fn apply_config(&self, config: ResolvedConfig) -> anyhow::Result<()> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx
            .send(SupervisorCommand::ApplyConfig { config, respond_to })
            .await?;
        rx.await?
    }

    pub async fn stats(&self) -> anyhow::Result<SupervisorStats> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(SupervisorCommand::GetStats { respond_to }).await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (respond_to, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(SupervisorCommand::Shutdown { respond_to }).await?;
        Ok(rx.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResolvedAlertingConfig, StorageConfig};
    use crate::model::TargetEndpoints;

    fn target(name: &str, interval_secs: u64) -> Target {
        Target {
            name: name.to_string(),
            group: String::new(),
            target_type: crate::model::TargetType::Actuator,
            interval_secs,
            endpoints: TargetEndpoints::Single("http://127.0.0.1:1/actuator".to_string()),
        }
    }

    fn resolved_config(targets: Vec<Target>) -> ResolvedConfig {
        ResolvedConfig {
            targets,
            alerting: ResolvedAlertingConfig {
                enabled: true,
                check_interval_secs: 60,
                cooldown_secs: 300,
                channels: Default::default(),
                rules: Vec::new(),
            },
            storage: StorageConfig::None,
            timezone: chrono_tz::UTC,
        }
    }

    #[tokio::test]
    async fn apply_config_starts_and_stops_targets() {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (sample_tx, _sample_rx) = broadcast::channel(64);
        let (status_tx, _status_rx) = broadcast::channel(64);
        let actor = SupervisorActor::new(command_rx, sample_tx, status_tx);
        let handle = SupervisorHandle::new(command_tx);
        tokio::spawn(actor.run());

        handle
            .apply_config(resolved_config(vec![target("a", 60), target("b", 60)]))
            .await
            .unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.running_targets, 2);

        handle.apply_config(resolved_config(vec![target("a", 60)])).await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.running_targets, 1);
    }

    #[tokio::test]
    async fn apply_config_is_idempotent_for_unchanged_targets() {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (sample_tx, _sample_rx) = broadcast::channel(64);
        let (status_tx, _status_rx) = broadcast::channel(64);
        let actor = SupervisorActor::new(command_rx, sample_tx, status_tx);
        let handle = SupervisorHandle::new(command_tx);
        tokio::spawn(actor.run());

        handle.apply_config(resolved_config(vec![target("a", 60)])).await.unwrap();
        handle.apply_config(resolved_config(vec![target("a", 60)])).await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.running_targets, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_every_target() {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (sample_tx, _sample_rx) = broadcast::channel(64);
        let (status_tx, _status_rx) = broadcast::channel(64);
        let actor = SupervisorActor::new(command_rx, sample_tx, status_tx);
        let handle = SupervisorHandle::new(command_tx);
        tokio::spawn(actor.run());

        handle
            .apply_config(resolved_config(vec![target("a", 60), target("b", 60)]))
            .await
            .unwrap();
        handle.shutdown().await.unwrap();
    }
}
