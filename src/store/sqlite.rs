//! SQLite-backed store.
//!
//! - **WAL mode** for read/write concurrency.
//! - **Connection pooling** via `sqlx::SqlitePool`.
//! - **Migrations** run once at startup from `./migrations`.
//! - **Pure-column schema**: `Sample`'s fields are fully enumerated and
//!   stable, so `pool_metrics` carries no JSON metadata blob (a deliberate
//!   deviation from the hybrid `MetricRow` this module descends from).

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{QueryRange, StorageBackend};
use super::error::{StoreError, StoreResult};
use crate::model::{
    Alert, AlertRule, AlertStats, AlertStatus, MaintenanceWindow, MaintenanceWindowBounds, Sample,
    Severity,
};

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();
        info!("initializing sqlite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running store migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    fn severity_to_str(s: Severity) -> &'static str {
        match s {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    fn severity_from_str(s: &str) -> StoreResult<Severity> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(StoreError::QueryFailed(format!("unknown severity: '{s}'"))),
        }
    }

    fn status_to_str(s: AlertStatus) -> &'static str {
        match s {
            AlertStatus::Fired => "fired",
            AlertStatus::Resolved => "resolved",
        }
    }

    fn status_from_str(s: &str) -> StoreResult<AlertStatus> {
        match s {
            "fired" => Ok(AlertStatus::Fired),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(StoreError::QueryFailed(format!("unknown status: '{s}'"))),
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn append_samples_batch(&self, samples: &[(String, String, Sample)]) -> StoreResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (target, instance, sample) in samples {
            sqlx::query(
                "INSERT INTO pool_metrics (target, instance, ts, active, idle, pending, max, \
                 timeout_count, acquire_p99_seconds, heap_used, heap_max, nonheap_used, \
                 threads_live, cpu_usage_ratio, gc_count, gc_total_seconds) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(target)
            .bind(instance)
            .bind(sample.ts.timestamp_millis())
            .bind(sample.active)
            .bind(sample.idle)
            .bind(sample.pending)
            .bind(sample.max)
            .bind(sample.timeout_count)
            .bind(sample.acquire_p99_seconds)
            .bind(sample.heap_used as i64)
            .bind(sample.heap_max as i64)
            .bind(sample.nonheap_used as i64)
            .bind(sample.threads_live)
            .bind(sample.cpu_usage_ratio)
            .bind(sample.gc_count)
            .bind(sample.gc_total_seconds)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_range(&self, query: QueryRange) -> StoreResult<Vec<(String, Sample)>> {
        let rows = if let Some(instance) = &query.instance {
            sqlx::query(
                "SELECT instance, ts, active, idle, pending, max, timeout_count, \
                 acquire_p99_seconds, heap_used, heap_max, nonheap_used, threads_live, \
                 cpu_usage_ratio, gc_count, gc_total_seconds FROM pool_metrics \
                 WHERE target = ? AND instance = ? AND ts >= ? AND ts <= ? ORDER BY ts ASC",
            )
            .bind(&query.target)
            .bind(instance)
            .bind(query.from.timestamp_millis())
            .bind(query.to.timestamp_millis())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT instance, ts, active, idle, pending, max, timeout_count, \
                 acquire_p99_seconds, heap_used, heap_max, nonheap_used, threads_live, \
                 cpu_usage_ratio, gc_count, gc_total_seconds FROM pool_metrics \
                 WHERE target = ? AND ts >= ? AND ts <= ? ORDER BY ts ASC",
            )
            .bind(&query.target)
            .bind(query.from.timestamp_millis())
            .bind(query.to.timestamp_millis())
            .fetch_all(&self.pool)
            .await?
        };

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let ts_millis: i64 = row.try_get("ts")?;
            let sample = Sample {
                ts: Utc.timestamp_millis_opt(ts_millis).single().unwrap_or_else(Utc::now),
                active: row.try_get::<i64, _>("active")? as u32,
                idle: row.try_get::<i64, _>("idle")? as u32,
                pending: row.try_get::<i64, _>("pending")? as u32,
                max: row.try_get::<i64, _>("max")? as u32,
                timeout_count: row.try_get::<i64, _>("timeout_count")? as u32,
                acquire_p99_seconds: row.try_get("acquire_p99_seconds")?,
                heap_used: row.try_get::<i64, _>("heap_used")? as u64,
                heap_max: row.try_get::<i64, _>("heap_max")? as u64,
                nonheap_used: row.try_get::<i64, _>("nonheap_used")? as u64,
                threads_live: row.try_get::<i64, _>("threads_live")? as u32,
                cpu_usage_ratio: row.try_get("cpu_usage_ratio")?,
                gc_count: row.try_get::<i64, _>("gc_count")? as u32,
                gc_total_seconds: row.try_get("gc_total_seconds")?,
            };
            results.push((row.try_get::<String, _>("instance")?, sample));
        }
        Ok(results)
    }

    async fn get_active_alert_by_rule(
        &self,
        target: &str,
        instance: &str,
        rule: &str,
    ) -> StoreResult<Option<Alert>> {
        let row = sqlx::query(
            "SELECT id, target, instance, rule, severity, message, status, fired_at, \
             resolved_at, notified_at, channels FROM alerts \
             WHERE target = ? AND instance = ? AND rule = ? AND status = 'fired' LIMIT 1",
        )
        .bind(target)
        .bind(instance)
        .bind(rule)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::alert_from_row).transpose()
    }

    async fn save_alert(&self, alert: &Alert) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO alerts (id, target, instance, rule, severity, message, status, \
             fired_at, resolved_at, notified_at, channels) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.id.to_string())
        .bind(&alert.target_name)
        .bind(&alert.instance_name)
        .bind(&alert.rule_name)
        .bind(Self::severity_to_str(alert.severity))
        .bind(&alert.message)
        .bind(Self::status_to_str(alert.status))
        .bind(alert.fired_at.timestamp_millis())
        .bind(alert.resolved_at.map(|t| t.timestamp_millis()))
        .bind(alert.notified_at.map(|t| t.timestamp_millis()))
        .bind(alert.channels_notified.join(","))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_alert(&self, alert: &Alert) -> StoreResult<()> {
        sqlx::query(
            "UPDATE alerts SET status = ?, resolved_at = ?, notified_at = ?, channels = ? WHERE id = ?",
        )
        .bind(Self::status_to_str(alert.status))
        .bind(alert.resolved_at.map(|t| t.timestamp_millis()))
        .bind(alert.notified_at.map(|t| t.timestamp_millis()))
        .bind(alert.channels_notified.join(","))
        .bind(alert.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alerts(&self, target: Option<&str>, active_only: bool) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT id, target, instance, rule, severity, message, status, fired_at, \
             resolved_at, notified_at, channels FROM alerts \
             WHERE (? IS NULL OR target = ?) AND (? = 0 OR status = 'fired') ORDER BY fired_at DESC",
        )
        .bind(target)
        .bind(target)
        .bind(active_only as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::alert_from_row).collect()
    }

    async fn create_rule(&self, rule: &AlertRule) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO alert_rules (id, name, condition, severity, message, enabled) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&rule.name)
        .bind(&rule.condition)
        .bind(Self::severity_to_str(rule.severity))
        .bind(&rule.message_template)
        .bind(rule.enabled as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_rule(&self, rule: &AlertRule) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE alert_rules SET condition = ?, severity = ?, message = ?, enabled = ? WHERE name = ?",
        )
        .bind(&rule.condition)
        .bind(Self::severity_to_str(rule.severity))
        .bind(&rule.message_template)
        .bind(rule.enabled as i64)
        .bind(&rule.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rule '{}'", rule.name)));
        }
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rule '{name}'")));
        }
        Ok(())
    }

    async fn list_rules(&self) -> StoreResult<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT name, condition, severity, message, enabled FROM alert_rules")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AlertRule {
                    name: row.try_get("name")?,
                    condition: row.try_get("condition")?,
                    severity: Self::severity_from_str(&row.try_get::<String, _>("severity")?)?,
                    message_template: row.try_get("message")?,
                    enabled: row.try_get::<i64, _>("enabled")? != 0,
                })
            })
            .collect()
    }

    async fn create_maintenance_window(&self, window: &MaintenanceWindow) -> StoreResult<()> {
        let (recurring, days_of_week, start_time, end_time, start_at, end_at) = match &window.window {
            MaintenanceWindowBounds::Recurring {
                days_of_week,
                start_time,
                end_time,
            } => (
                1i64,
                Some(
                    days_of_week
                        .iter()
                        .map(|d| d.num_days_from_monday().to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                Some(start_time.format("%H:%M:%S").to_string()),
                Some(end_time.format("%H:%M:%S").to_string()),
                None,
                None,
            ),
            MaintenanceWindowBounds::Once { start, end } => {
                (0, None, None, None, Some(start.timestamp_millis()), Some(end.timestamp_millis()))
            }
        };

        sqlx::query(
            "INSERT INTO maintenance_windows (id, name, description, target, recurring, \
             days_of_week, start_time, end_time, start_at, end_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(window.id.to_string())
        .bind(&window.name)
        .bind(&window.description)
        .bind(&window.target_name)
        .bind(recurring)
        .bind(days_of_week)
        .bind(start_time)
        .bind(end_time)
        .bind(start_at)
        .bind(end_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_maintenance_window(&self, id: uuid::Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM maintenance_windows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("maintenance window {id}")));
        }
        Ok(())
    }

    async fn list_maintenance_windows(&self) -> StoreResult<Vec<MaintenanceWindow>> {
        let rows = sqlx::query(
            "SELECT id, name, description, target, recurring, days_of_week, start_time, \
             end_time, start_at, end_at FROM maintenance_windows",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let recurring: i64 = row.try_get("recurring")?;
                let window = if recurring != 0 {
                    let days_raw: String = row.try_get("days_of_week")?;
                    let days_of_week = days_raw
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .filter_map(|s| s.parse::<u8>().ok())
                        .filter_map(|n| Weekday::try_from(n).ok())
                        .collect();
                    let start_time: String = row.try_get("start_time")?;
                    let end_time: String = row.try_get("end_time")?;
                    MaintenanceWindowBounds::Recurring {
                        days_of_week,
                        start_time: NaiveTime::parse_from_str(&start_time, "%H:%M:%S")
                            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                        end_time: NaiveTime::parse_from_str(&end_time, "%H:%M:%S")
                            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
                    }
                } else {
                    let start_at: i64 = row.try_get("start_at")?;
                    let end_at: i64 = row.try_get("end_at")?;
                    MaintenanceWindowBounds::Once {
                        start: Utc.timestamp_millis_opt(start_at).single().unwrap_or_else(Utc::now),
                        end: Utc.timestamp_millis_opt(end_at).single().unwrap_or_else(Utc::now),
                    }
                };

                Ok(MaintenanceWindow {
                    id: row
                        .try_get::<String, _>("id")?
                        .parse()
                        .map_err(|_| StoreError::QueryFailed("invalid window id".to_string()))?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    target_name: row.try_get("target")?,
                    window,
                })
            })
            .collect()
    }

    async fn get_alert_stats(&self) -> StoreResult<AlertStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE status = 'fired'")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query("SELECT severity, COUNT(*) as n FROM alerts WHERE status = 'fired' GROUP BY severity")
            .fetch_all(&self.pool)
            .await?;

        let mut by_severity = std::collections::HashMap::new();
        for row in rows {
            let severity = Self::severity_from_str(&row.try_get::<String, _>("severity")?)?;
            by_severity.insert(severity, row.try_get::<i64, _>("n")? as u64);
        }

        Ok(AlertStats {
            total: total as u64,
            active: active as u64,
            by_severity,
        })
    }

    #[instrument(skip(self))]
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        const BATCH_SIZE: i64 = 5_000;
        let mut total_deleted = 0usize;

        loop {
            let result = sqlx::query(
                "DELETE FROM pool_metrics WHERE id IN \
                 (SELECT id FROM pool_metrics WHERE ts < ? LIMIT ?)",
            )
            .bind(before.timestamp_millis())
            .bind(BATCH_SIZE)
            .execute(&self.pool)
            .await?;

            let deleted = result.rows_affected() as usize;
            total_deleted += deleted;
            if deleted < BATCH_SIZE as usize {
                break;
            }
            tokio::task::yield_now().await;
        }

        Ok(total_deleted)
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteBackend {
    fn alert_from_row(row: sqlx::sqlite::SqliteRow) -> StoreResult<Alert> {
        Ok(Alert {
            id: row
                .try_get::<String, _>("id")?
                .parse()
                .map_err(|_| StoreError::QueryFailed("invalid alert id".to_string()))?,
            target_name: row.try_get("target")?,
            instance_name: row.try_get("instance")?,
            rule_name: row.try_get("rule")?,
            severity: Self::severity_from_str(&row.try_get::<String, _>("severity")?)?,
            message: row.try_get("message")?,
            status: Self::status_from_str(&row.try_get::<String, _>("status")?)?,
            fired_at: Utc
                .timestamp_millis_opt(row.try_get("fired_at")?)
                .single()
                .unwrap_or_else(Utc::now),
            resolved_at: row
                .try_get::<Option<i64>, _>("resolved_at")?
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            notified_at: row
                .try_get::<Option<i64>, _>("notified_at")?
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            channels_notified: row
                .try_get::<String, _>("channels")?
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}
