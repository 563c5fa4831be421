//! SQLite-backed persistence: batch writes round-trip through `query_range`,
//! and the retention sweep deletes only samples older than its cutoff while
//! leaving recent samples and every alert untouched.

use chrono::{Duration, Utc};
use pondy::model::{Alert, AlertStatus, Severity};
use pondy::store::StorageBackend;
use pondy::store::backend::QueryRange;
use pondy::store::sqlite::SqliteBackend;
use tempfile::tempdir;

use crate::helpers::sample;

#[tokio::test]
async fn batch_append_round_trips_through_query_range() {
    let dir = tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("pondy.db")).await.unwrap();

    let now = Utc::now();
    let batch: Vec<(String, String, pondy::model::Sample)> = (0..5)
        .map(|i| ("svc".to_string(), "default".to_string(), pondy::model::Sample { ts: now - Duration::minutes(5 - i), ..sample() }))
        .collect();
    backend.append_samples_batch(&batch).await.unwrap();

    let results = backend
        .query_range(QueryRange {
            target: "svc".to_string(),
            instance: None,
            from: now - Duration::hours(1),
            to: now + Duration::hours(1),
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    // Ordered ascending by timestamp.
    for pair in results.windows(2) {
        assert!(pair[0].1.ts <= pair[1].1.ts);
    }

    backend.close().await.unwrap();
}

#[tokio::test]
async fn retention_sweep_removes_only_samples_older_than_the_cutoff() {
    let dir = tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path().join("pondy.db")).await.unwrap();

    let now = Utc::now();
    // Samples spanning T-26h..T, one per hour.
    let batch: Vec<(String, String, pondy::model::Sample)> = (0..27)
        .map(|hours_ago| {
            (
                "svc".to_string(),
                "default".to_string(),
                pondy::model::Sample {
                    ts: now - Duration::hours(26 - hours_ago),
                    ..sample()
                },
            )
        })
        .collect();
    backend.append_samples_batch(&batch).await.unwrap();

    // A fired alert must survive the sweep untouched: retention only ever
    // applies to samples.
    let alert = Alert {
        id: uuid::Uuid::new_v4(),
        target_name: "svc".to_string(),
        instance_name: "default".to_string(),
        rule_name: "high-usage".to_string(),
        severity: Severity::Warning,
        message: "test".to_string(),
        status: AlertStatus::Fired,
        fired_at: now - Duration::hours(25),
        resolved_at: None,
        notified_at: None,
        channels_notified: Vec::new(),
    };
    backend.save_alert(&alert).await.unwrap();

    let cutoff = now - Duration::days(1); // retention_days = 1
    let deleted = backend.cleanup_old_samples(cutoff).await.unwrap();
    // Samples at T-26h and T-25h fall strictly before the T-24h cutoff; the
    // rest (T-24h through T, inclusive) are kept.
    assert_eq!(deleted, 2, "only samples strictly older than T-24h should be deleted");

    let remaining = backend
        .query_range(QueryRange {
            target: "svc".to_string(),
            instance: None,
            from: now - Duration::hours(48),
            to: now + Duration::hours(1),
        })
        .await
        .unwrap();
    assert_eq!(remaining.len(), 25);
    assert!(remaining.iter().all(|(_, s)| s.ts >= cutoff));

    let still_there = backend.get_active_alert_by_rule("svc", "default", "high-usage").await.unwrap();
    assert!(still_there.is_some(), "retention must never touch alerts");

    backend.close().await.unwrap();
}
