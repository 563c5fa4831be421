//! Shared fixtures for integration tests: a default `Sample`, a pair of
//! spawned actors wired over `MemoryBackend`, and small polling helpers.

use std::time::Duration;

use chrono::Utc;
use pondy::actors::alert::{AlertActor, AlertHandle};
use pondy::actors::messages::{AlertCommand, SampleEvent, StorageCommand};
use pondy::actors::storage::{StorageActor, StoreHandle};
use pondy::config::ChannelsConfig;
use pondy::model::{AlertRule, Sample, Severity};
use pondy::store::memory::MemoryBackend;
use tokio::sync::{broadcast, mpsc};

pub const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// A baseline `Sample` with every field at a quiescent value. Override the
/// fields a test cares about with struct-update syntax.
pub fn sample() -> Sample {
    Sample {
        ts: Utc::now(),
        active: 0,
        idle: 10,
        pending: 0,
        max: 10,
        timeout_count: 0,
        acquire_p99_seconds: 0.0,
        heap_used: 0,
        heap_max: 0,
        nonheap_used: 0,
        threads_live: 0,
        cpu_usage_ratio: 0.0,
        gc_count: 0,
        gc_total_seconds: 0.0,
    }
}

pub fn sample_with_pool(active: u32, max: u32) -> Sample {
    Sample { active, max, ..sample() }
}

pub fn rule(name: &str, condition: &str, severity: Severity) -> AlertRule {
    AlertRule {
        name: name.to_string(),
        condition: condition.to_string(),
        severity,
        message_template: format!("{name} triggered on {{{{ .TargetName }}}}/{{{{ .InstanceName }}}}"),
        enabled: true,
    }
}

pub fn sample_event(target: &str, instance: &str, sample: Sample) -> SampleEvent {
    SampleEvent {
        target_name: target.to_string(),
        instance_name: instance.to_string(),
        sample,
    }
}

/// A running `StorageActor` (over `MemoryBackend`) plus an `AlertActor`
/// subscribed to the same sample broadcast, wired the way `bin/pondy.rs`
/// wires them but without a Supervisor/Scraper in front.
pub struct Pipeline {
    pub sample_tx: broadcast::Sender<SampleEvent>,
    pub store: StoreHandle,
    pub alert: AlertHandle,
    storage_task: tokio::task::JoinHandle<()>,
    alert_task: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    pub async fn spawn(rules: Vec<AlertRule>, cooldown_secs: u64) -> Self {
        Self::spawn_with_channels(rules, cooldown_secs, ChannelsConfig::default()).await
    }

    pub async fn spawn_with_channels(rules: Vec<AlertRule>, cooldown_secs: u64, channels: ChannelsConfig) -> Self {
        let (sample_tx, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        let (storage_cmd_tx, storage_cmd_rx) = mpsc::channel::<StorageCommand>(32);
        let backend = Box::new(MemoryBackend::new());
        let storage_actor = StorageActor::new(backend, storage_cmd_rx, sample_tx.subscribe(), None, 24);
        let storage_task = tokio::spawn(storage_actor.run());
        let store = StoreHandle::new(storage_cmd_tx);

        let (alert_cmd_tx, alert_cmd_rx) = mpsc::channel::<AlertCommand>(32);
        let alert_actor = AlertActor::new(rules, &channels, cooldown_secs, store.clone(), sample_tx.subscribe(), alert_cmd_rx);
        let alert_task = tokio::spawn(alert_actor.run());
        let alert = AlertHandle::new(alert_cmd_tx);

        Self {
            sample_tx,
            store,
            alert,
            storage_task,
            alert_task,
        }
    }

    pub async fn send(&self, event: SampleEvent) {
        self.sample_tx.send(event).expect("no subscribers");
        // Give the AlertActor's select! loop a turn to process the sample.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub async fn shutdown(self) {
        self.alert.shutdown().await;
        let _ = self.alert_task.await;
        self.store.shutdown().await;
        let _ = self.storage_task.await;
    }
}

/// Poll `f` until it returns `Some`, or panic after `timeout`.
pub async fn poll_until<F, Fut, T>(timeout: Duration, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = f().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition did not become true within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
