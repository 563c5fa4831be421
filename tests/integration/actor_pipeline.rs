//! End-to-end behavior of the Storage/Alert actor pair: cooldown
//! deduplication, the fire -> resolve lifecycle, and maintenance-window
//! suppression, each driven purely through `SampleEvent` broadcasts.

use std::time::Duration;

use chrono::Utc;
use pondy::model::{AlertStatus, MaintenanceWindow, MaintenanceWindowBounds, Severity};

use crate::helpers::*;

const USAGE_RULE_CONDITION: &str = "usage > 80";

#[tokio::test]
async fn cooldown_race_fires_exactly_once() {
    let pipeline = Pipeline::spawn(vec![rule("high-usage", USAGE_RULE_CONDITION, Severity::Warning)], 300).await;

    let event = sample_event("svc-a", "default", sample_with_pool(90, 100));

    // Two near-concurrent triggering samples for the same (target, instance,
    // rule). The single write-locked cooldown check-and-reserve must let
    // exactly one of them through.
    pipeline.sample_tx.send(event.clone()).unwrap();
    pipeline.sample_tx.send(event).unwrap();

    let fired = poll_until(Duration::from_secs(2), || async {
        pipeline
            .store
            .get_active_alert_by_rule("svc-a", "default", "high-usage")
            .await
            .ok()
            .flatten()
    })
    .await;
    assert_eq!(fired.status, AlertStatus::Fired);

    // Give the second sample's evaluation time to land, then confirm it
    // didn't produce a duplicate.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = pipeline.alert.stats().await.unwrap();
    assert_eq!(stats.active, 1, "cooldown race must produce exactly one active alert");
    assert_eq!(stats.total, 1, "cooldown race must produce exactly one alert record total");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn fires_then_resolves_without_duplicate() {
    let pipeline = Pipeline::spawn(vec![rule("high-usage", USAGE_RULE_CONDITION, Severity::Warning)], 0).await;

    pipeline.send(sample_event("svc-b", "default", sample_with_pool(90, 100))).await;
    pipeline.send(sample_event("svc-b", "default", sample_with_pool(90, 100))).await;

    let fired = pipeline
        .store
        .get_active_alert_by_rule("svc-b", "default", "high-usage")
        .await
        .unwrap()
        .expect("alert should have fired on the first triggering sample");
    assert_eq!(fired.status, AlertStatus::Fired);

    let stats = pipeline.alert.stats().await.unwrap();
    assert_eq!(stats.total, 1, "second triggering sample must not duplicate the fired alert");

    // Third sample drops back under the threshold: the existing alert
    // should resolve, and no new alert should be recorded.
    pipeline.send(sample_event("svc-b", "default", sample_with_pool(50, 100))).await;

    poll_until(Duration::from_secs(2), || async {
        let stats = pipeline.alert.stats().await.ok()?;
        (stats.active == 0).then_some(())
    })
    .await;

    // `get_active_alert_by_rule` only ever returns `Fired` alerts, so once
    // resolved it must disappear from this lookup.
    let still_active = pipeline.store.get_active_alert_by_rule("svc-b", "default", "high-usage").await.unwrap();
    assert!(still_active.is_none());

    let stats = pipeline.alert.stats().await.unwrap();
    assert_eq!(stats.total, 1, "resolving must not create a second alert record");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn maintenance_window_suppresses_alerts_for_its_target() {
    let pipeline = Pipeline::spawn(vec![rule("high-usage", USAGE_RULE_CONDITION, Severity::Warning)], 0).await;

    let now = Utc::now();
    pipeline
        .store
        .create_maintenance_window(MaintenanceWindow {
            id: uuid::Uuid::new_v4(),
            name: "deploy".to_string(),
            description: "rolling deploy".to_string(),
            target_name: Some("svc-c".to_string()),
            window: MaintenanceWindowBounds::Once {
                start: now - chrono::Duration::minutes(5),
                end: now + chrono::Duration::hours(1),
            },
        })
        .await
        .unwrap();

    pipeline.send(sample_event("svc-c", "default", sample_with_pool(95, 100))).await;

    let during_window = pipeline.store.get_active_alert_by_rule("svc-c", "default", "high-usage").await.unwrap();
    assert!(during_window.is_none(), "alert must not fire while the target is under maintenance");

    // A maintenance window that has already ended must not suppress.
    pipeline
        .store
        .create_maintenance_window(MaintenanceWindow {
            id: uuid::Uuid::new_v4(),
            name: "past-deploy".to_string(),
            description: "already finished".to_string(),
            target_name: Some("svc-d".to_string()),
            window: MaintenanceWindowBounds::Once {
                start: now - chrono::Duration::hours(2),
                end: now - chrono::Duration::hours(1),
            },
        })
        .await
        .unwrap();

    pipeline.send(sample_event("svc-d", "default", sample_with_pool(95, 100))).await;

    let after_window = poll_until(Duration::from_secs(2), || async {
        pipeline.store.get_active_alert_by_rule("svc-d", "default", "high-usage").await.ok().flatten()
    })
    .await;
    assert_eq!(after_window.status, AlertStatus::Fired);

    pipeline.shutdown().await;
}
