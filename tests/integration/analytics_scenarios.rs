//! Analytics run against samples fetched through a real `StorageBackend`,
//! not the pure fixtures used by `src/analytics.rs`'s own unit tests — this
//! exercises the `query_range` round-trip the async wrappers depend on.

use chrono::{Duration, Utc};
use pondy::analytics::{self, Sensitivity};
use pondy::store::StorageBackend;
use pondy::store::memory::MemoryBackend;

use crate::helpers::sample_with_pool;

#[tokio::test]
async fn anomaly_detection_on_a_short_history_reports_normal_with_no_error() {
    let backend = MemoryBackend::new();
    let now = Utc::now();

    // Ten evenly-spaced, unremarkable samples: far below the minimum sample
    // count the anomaly detector requires before it will flag anything.
    let batch: Vec<_> = (0..10)
        .map(|i| ("svc".to_string(), "default".to_string(), pondy::model::Sample { ts: now - Duration::minutes(10 - i), ..sample_with_pool(30, 100) }))
        .collect();
    backend.append_samples_batch(&batch).await.unwrap();

    let report = analytics::anomalies(&backend, "svc", now - Duration::hours(1), now + Duration::hours(1), Sensitivity::Medium)
        .await
        .expect("short-history anomaly detection must not error");

    assert!(report.points.is_empty());
    assert_eq!(report.risk_level, analytics::RiskLevel::Normal);
}

#[tokio::test]
async fn recommend_and_peak_time_round_trip_through_the_backend() {
    let backend = MemoryBackend::new();
    let now = Utc::now();

    let batch: Vec<_> = (0..30)
        .map(|i| ("svc".to_string(), "default".to_string(), pondy::model::Sample { ts: now - Duration::minutes(30 - i), ..sample_with_pool(97, 100) }))
        .collect();
    backend.append_samples_batch(&batch).await.unwrap();

    let recommendations = analytics::recommend(&backend, "svc", now).await.unwrap();
    assert!(
        recommendations.iter().any(|r| r.kind == analytics::RecommendationKind::IncreasePoolMax),
        "sustained near-saturation usage should recommend raising pool max"
    );

    let report = analytics::peak_time(&backend, "svc", chrono_tz::UTC, now).await.unwrap();
    assert!(!report.buckets.is_empty());
}
