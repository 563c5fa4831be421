//! The `StorageBackend` trait: durable storage of samples, alerts, rules,
//! and maintenance windows, generalized from `storage/backend.rs`'s
//! single-`MetricRow` shape to Pondy's four entity families.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreResult;
use crate::model::{Alert, AlertRule, AlertStats, MaintenanceWindow, Sample};

/// A time-range query over a target's samples. `instance` of `None` means
/// aggregate over every instance's samples, interleaved by timestamp.
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub target: String,
    pub instance: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append a sample unconditionally. O(1) amortized; a backend error is
    /// surfaced, never swallowed. Convenience wrapper over the batch form.
    async fn append_sample(&self, target: &str, instance: &str, sample: &Sample) -> StoreResult<()> {
        self.append_samples_batch(&[(target.to_string(), instance.to_string(), *sample)]).await
    }

    /// Primary write path: batched inserts, matching `storage/backend.rs`'s
    /// `insert_batch` as the throughput-optimized entry point.
    async fn append_samples_batch(&self, samples: &[(String, String, Sample)]) -> StoreResult<()>;

    /// Ordered (by `ts`, ascending) samples within the range. An empty
    /// range returns an empty vector, never an error.
    async fn query_range(&self, query: QueryRange) -> StoreResult<Vec<(String, Sample)>>;

    /// At most one `Fired` alert per `(target, instance, rule)`.
    async fn get_active_alert_by_rule(
        &self,
        target: &str,
        instance: &str,
        rule: &str,
    ) -> StoreResult<Option<Alert>>;

    /// Persist a newly fired alert, assigning its id if unset.
    async fn save_alert(&self, alert: &Alert) -> StoreResult<()>;

    /// Overwrite status/resolved_at/notified_at/channels_notified by id.
    async fn update_alert(&self, alert: &Alert) -> StoreResult<()>;

    async fn list_alerts(&self, target: Option<&str>, active_only: bool) -> StoreResult<Vec<Alert>>;

    async fn create_rule(&self, rule: &AlertRule) -> StoreResult<()>;
    async fn update_rule(&self, rule: &AlertRule) -> StoreResult<()>;
    async fn delete_rule(&self, name: &str) -> StoreResult<()>;
    async fn list_rules(&self) -> StoreResult<Vec<AlertRule>>;

    async fn create_maintenance_window(&self, window: &MaintenanceWindow) -> StoreResult<()>;
    async fn delete_maintenance_window(&self, id: uuid::Uuid) -> StoreResult<()>;
    async fn list_maintenance_windows(&self) -> StoreResult<Vec<MaintenanceWindow>>;

    /// True if a window matching `target` (or matching every target) is
    /// active at `now`.
    async fn is_in_maintenance_window(&self, target: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self
            .list_maintenance_windows()
            .await?
            .iter()
            .any(|w| w.matches(target) && w.is_active_at(now)))
    }

    async fn get_alert_stats(&self) -> StoreResult<AlertStats>;

    /// Delete `pool_metrics` rows older than `before`. Returns the count
    /// deleted. Must run in bounded batches so it never starves writers.
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    async fn close(&self) -> StoreResult<()>;
}
