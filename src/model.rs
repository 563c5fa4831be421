//! Core domain types shared by every component of the monitoring pipeline.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A single monitored JVM service, identified by a globally unique name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub name: String,
    pub group: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub interval_secs: u64,
    pub endpoints: TargetEndpoints,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Actuator,
}

/// Either a single endpoint (instance id defaults to `"default"`) or an
/// explicit ordered list of named instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TargetEndpoints {
    Single(String),
    Instances(Vec<TargetInstance>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetInstance {
    pub id: String,
    pub endpoint: String,
}

impl Target {
    /// Flattens `endpoints` into `(instance_id, endpoint)` pairs.
    pub fn instances(&self) -> Vec<TargetInstance> {
        match &self.endpoints {
            TargetEndpoints::Single(endpoint) => vec![TargetInstance {
                id: "default".to_string(),
                endpoint: endpoint.clone(),
            }],
            TargetEndpoints::Instances(instances) => instances.clone(),
        }
    }
}

/// One point-in-time observation for a `(target, instance)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub ts: DateTime<Utc>,

    pub active: u32,
    pub idle: u32,
    pub pending: u32,
    pub max: u32,
    pub timeout_count: u32,
    pub acquire_p99_seconds: f64,

    pub heap_used: u64,
    pub heap_max: u64,
    pub nonheap_used: u64,
    pub threads_live: u32,
    pub cpu_usage_ratio: f64,
    pub gc_count: u32,
    pub gc_total_seconds: f64,
}

impl Sample {
    /// `100 * active / max`, or `0` when the target reports no pool info (`max == 0`).
    pub fn usage_pct(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            100.0 * self.active as f64 / self.max as f64
        }
    }

    /// `100 * heap_used / heap_max`, or `0` when `heap_max == 0`.
    pub fn heap_pct(&self) -> f64 {
        if self.heap_max == 0 {
            0.0
        } else {
            100.0 * self.heap_used as f64 / self.heap_max as f64
        }
    }
}

/// A sample tagged with the target/instance it was scraped from, as it
/// flows from Scraper -> Supervisor -> {Store, Alert Engine}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaggedSample {
    pub target_name: String,
    pub instance_name: String,
    pub sample: Sample,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A named, user-authored alerting rule. File-defined rules are read-only;
/// store-defined rules support CRUD. Uniqueness is per-source, by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub name: String,
    pub condition: String,
    pub severity: Severity,
    pub message_template: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Fired,
    Resolved,
}

/// A stored record of a rule violation with a fire -> resolve lifecycle.
/// Invariant: at most one `Fired` alert exists per `(target, instance, rule)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub target_name: String,
    pub instance_name: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    pub channels_notified: Vec<String>,
}

/// A time interval during which alert evaluation is suppressed for matching
/// targets. See `SPEC_FULL.md` §9 for the recurring-vs-one-off field semantics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceWindow {
    pub id: uuid::Uuid,
    pub name: String,
    pub description: String,
    /// `None` matches every target.
    pub target_name: Option<String>,
    pub window: MaintenanceWindowBounds,
}

/// A recurring window repeats every week on the given weekdays, active only
/// during the given time-of-day. A one-off window is a single absolute
/// `DateTime<Utc>` range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "recurring")]
pub enum MaintenanceWindowBounds {
    #[serde(rename = "true")]
    Recurring {
        days_of_week: Vec<chrono::Weekday>,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    #[serde(rename = "false")]
    Once {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl MaintenanceWindow {
    pub fn matches(&self, target_name: &str) -> bool {
        self.target_name
            .as_deref()
            .is_none_or(|name| name == target_name)
    }

    /// Is this window active at `now`, per the time-of-day (recurring) or
    /// absolute-range (one-off) semantics documented in `DESIGN.md`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match &self.window {
            MaintenanceWindowBounds::Once { start, end } => now >= *start && now <= *end,
            MaintenanceWindowBounds::Recurring {
                days_of_week,
                start_time,
                end_time,
            } => {
                let weekday = now.weekday();
                let tod = now.time();
                days_of_week.contains(&weekday) && tod >= *start_time && tod <= *end_time
            }
        }
    }
}

/// Aggregate counts returned by `GetAlertStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertStats {
    pub total: u64,
    pub active: u64,
    pub by_severity: HashMap<Severity, u64>,
}
