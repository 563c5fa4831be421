//! Message types for actor communication.
//!
//! Commands are request/response messages sent to a specific actor via
//! `mpsc`; events are broadcast notifications fanned out to every
//! subscriber. All message types are cloneable for multi-subscriber use.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::config::ResolvedConfig;
use crate::model::{Alert, AlertRule, AlertStats, MaintenanceWindow, Sample, TaggedSample, Target};

/// Published by a Scraper for every successfully (or partially) decoded
/// sample, regardless of whether every metric field resolved.
#[derive(Debug, Clone)]
pub struct SampleEvent {
    pub target_name: String,
    pub instance_name: String,
    pub sample: Sample,
}

impl From<TaggedSample> for SampleEvent {
    fn from(t: TaggedSample) -> Self {
        SampleEvent {
            target_name: t.target_name,
            instance_name: t.instance_name,
            sample: t.sample,
        }
    }
}

/// Published whenever a Scraper's per-instance consecutive-failure count
/// crosses the `unknown/offline` threshold, or recovers from it.
#[derive(Debug, Clone)]
pub struct TargetStatusEvent {
    pub target_name: String,
    pub instance_name: String,
    pub online: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ScraperCommand {
    /// Trigger an immediate scrape, bypassing the interval timer.
    PollNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    /// Atomically swap the target spec; the next tick uses the new
    /// interval and endpoints.
    Reconfigure { target: Target },
    /// Stop the loop, close idle HTTP connections, and return once the
    /// in-flight fetch completes or the grace timeout elapses.
    Shutdown,
}

#[derive(Debug)]
pub enum SupervisorCommand {
    /// Diff the incoming target set against the running one and
    /// start/reconfigure/stop Scrapers accordingly. Idempotent.
    ApplyConfig {
        config: ResolvedConfig,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    GetStats {
        respond_to: oneshot::Sender<SupervisorStats>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorStats {
    pub running_targets: usize,
    pub samples_routed: u64,
    pub samples_dropped: u64,
}

#[derive(Debug)]
pub enum StorageCommand {
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },
    QueryRange {
        query: crate::store::backend::QueryRange,
        respond_to: oneshot::Sender<anyhow::Result<Vec<(String, Sample)>>>,
    },
    GetAlertStats {
        respond_to: oneshot::Sender<anyhow::Result<AlertStats>>,
    },
    ListAlerts {
        target: Option<String>,
        active_only: bool,
        respond_to: oneshot::Sender<anyhow::Result<Vec<Alert>>>,
    },
    GetActiveAlertByRule {
        target: String,
        instance: String,
        rule: String,
        respond_to: oneshot::Sender<anyhow::Result<Option<Alert>>>,
    },
    SaveAlert {
        alert: Alert,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    UpdateAlert {
        alert: Alert,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    IsInMaintenanceWindow {
        target: String,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<anyhow::Result<bool>>,
    },
    CreateRule {
        rule: AlertRule,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    DeleteRule {
        name: String,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    ListRules {
        respond_to: oneshot::Sender<anyhow::Result<Vec<AlertRule>>>,
    },
    CreateMaintenanceWindow {
        window: MaintenanceWindow,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    ListMaintenanceWindows {
        respond_to: oneshot::Sender<anyhow::Result<Vec<MaintenanceWindow>>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub buffer_size: usize,
    pub flush_count: u64,
    pub last_cleanup_time: Option<DateTime<Utc>>,
    pub total_samples_deleted: u64,
}

#[derive(Debug)]
pub enum AlertCommand {
    /// Bypass cooldown and maintenance-window suppression, dispatching to
    /// one or all channels immediately. See `SPEC_FULL.md` §4.5.5.
    TestAlert {
        target_name: String,
        rule_name: String,
        channels: Vec<String>,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    GetStats {
        respond_to: oneshot::Sender<AlertStats>,
    },
    Shutdown,
}
