//! An in-memory `StorageBackend`, used when no `storage` config section is
//! present and as the backend of choice for the Analytics and Alert Engine
//! test suites. Unlike the teacher's `storage/memory.rs` placeholder, every
//! operation here actually holds and returns data.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::backend::{QueryRange, StorageBackend};
use super::error::{StoreError, StoreResult};
use crate::model::{Alert, AlertRule, AlertStats, AlertStatus, MaintenanceWindow, Sample, Severity};

#[derive(Default)]
struct Inner {
    samples: HashMap<(String, String), Vec<Sample>>,
    alerts: Vec<Alert>,
    rules: Vec<AlertRule>,
    windows: Vec<MaintenanceWindow>,
}

pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn append_samples_batch(&self, samples: &[(String, String, Sample)]) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        for (target, instance, sample) in samples {
            inner
                .samples
                .entry((target.clone(), instance.clone()))
                .or_default()
                .push(*sample);
        }
        Ok(())
    }

    async fn query_range(&self, query: QueryRange) -> StoreResult<Vec<(String, Sample)>> {
        let inner = self.inner.read().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        let mut results: Vec<(String, Sample)> = Vec::new();

        for ((target, instance), samples) in &inner.samples {
            if target != &query.target {
                continue;
            }
            if let Some(wanted) = &query.instance {
                if instance != wanted {
                    continue;
                }
            }
            for sample in samples {
                if sample.ts >= query.from && sample.ts <= query.to {
                    results.push((instance.clone(), *sample));
                }
            }
        }

        results.sort_by_key(|(_, s)| s.ts);
        Ok(results)
    }

    async fn get_active_alert_by_rule(
        &self,
        target: &str,
        instance: &str,
        rule: &str,
    ) -> StoreResult<Option<Alert>> {
        let inner = self.inner.read().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        Ok(inner
            .alerts
            .iter()
            .find(|a| {
                a.target_name == target
                    && a.instance_name == instance
                    && a.rule_name == rule
                    && a.status == AlertStatus::Fired
            })
            .cloned())
    }

    async fn save_alert(&self, alert: &Alert) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        inner.alerts.push(alert.clone());
        Ok(())
    }

    async fn update_alert(&self, alert: &Alert) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        match inner.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("alert {}", alert.id))),
        }
    }

    async fn list_alerts(&self, target: Option<&str>, active_only: bool) -> StoreResult<Vec<Alert>> {
        let inner = self.inner.read().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        Ok(inner
            .alerts
            .iter()
            .filter(|a| target.is_none_or(|t| t == a.target_name))
            .filter(|a| !active_only || a.status == AlertStatus::Fired)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: &AlertRule) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        if inner.rules.iter().any(|r| r.name == rule.name) {
            return Err(StoreError::InvalidConfig(format!("rule '{}' already exists", rule.name)));
        }
        inner.rules.push(rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &AlertRule) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        match inner.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("rule '{}'", rule.name))),
        }
    }

    async fn delete_rule(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        let before = inner.rules.len();
        inner.rules.retain(|r| r.name != name);
        if inner.rules.len() == before {
            return Err(StoreError::NotFound(format!("rule '{name}'")));
        }
        Ok(())
    }

    async fn list_rules(&self) -> StoreResult<Vec<AlertRule>> {
        let inner = self.inner.read().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        Ok(inner.rules.clone())
    }

    async fn create_maintenance_window(&self, window: &MaintenanceWindow) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        inner.windows.push(window.clone());
        Ok(())
    }

    async fn delete_maintenance_window(&self, id: uuid::Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        let before = inner.windows.len();
        inner.windows.retain(|w| w.id != id);
        if inner.windows.len() == before {
            return Err(StoreError::NotFound(format!("maintenance window {id}")));
        }
        Ok(())
    }

    async fn list_maintenance_windows(&self) -> StoreResult<Vec<MaintenanceWindow>> {
        let inner = self.inner.read().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        Ok(inner.windows.clone())
    }

    async fn get_alert_stats(&self) -> StoreResult<AlertStats> {
        let inner = self.inner.read().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        let mut stats = AlertStats::default();
        stats.total = inner.alerts.len() as u64;
        for alert in &inner.alerts {
            if alert.status == AlertStatus::Fired {
                stats.active += 1;
                *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.write().map_err(|_| StoreError::QueryFailed("poisoned lock".into()))?;
        let mut deleted = 0;
        for samples in inner.samples.values_mut() {
            let before_len = samples.len();
            samples.retain(|s| s.ts >= before);
            deleted += before_len - samples.len();
        }
        Ok(deleted)
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(active: u32, ts: DateTime<Utc>) -> Sample {
        Sample {
            ts,
            active,
            idle: 0,
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

    #[tokio::test]
    async fn append_and_query_range_round_trips() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.append_sample("svc", "default", &sample(1, now)).await.unwrap();
        backend.append_sample("svc", "default", &sample(2, now + Duration::seconds(1))).await.unwrap();

        let results = backend
            .query_range(QueryRange {
                target: "svc".to_string(),
                instance: None,
                from: now - Duration::seconds(10),
                to: now + Duration::seconds(10),
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1.active, 1);
        assert_eq!(results[1].1.active, 2);
    }

    #[tokio::test]
    async fn query_range_empty_when_no_overlap() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.append_sample("svc", "default", &sample(1, now)).await.unwrap();

        let results = backend
            .query_range(QueryRange {
                target: "svc".to_string(),
                instance: None,
                from: now + Duration::hours(1),
                to: now + Duration::hours(2),
            })
            .await
            .unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn at_most_one_active_alert_per_rule() {
        let backend = MemoryBackend::new();
        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            target_name: "svc".to_string(),
            instance_name: "default".to_string(),
            rule_name: "usage_high".to_string(),
            severity: Severity::Warning,
            message: "high".to_string(),
            status: AlertStatus::Fired,
            fired_at: Utc::now(),
            resolved_at: None,
            notified_at: None,
            channels_notified: vec![],
        };
        backend.save_alert(&alert).await.unwrap();

        let active = backend
            .get_active_alert_by_rule("svc", "default", "usage_high")
            .await
            .unwrap();
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn cleanup_old_samples_deletes_only_stale_rows() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.append_sample("svc", "default", &sample(1, now - Duration::days(10))).await.unwrap();
        backend.append_sample("svc", "default", &sample(2, now)).await.unwrap();

        let deleted = backend.cleanup_old_samples(now - Duration::days(1)).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = backend
            .query_range(QueryRange {
                target: "svc".to_string(),
                instance: None,
                from: now - Duration::days(30),
                to: now + Duration::days(1),
            })
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
