//! Failure-mode behavior: a target whose Actuator endpoint answers some
//! metrics and fails others must still produce a usable partial `Sample`,
//! and only the rules that depend on the metrics that actually resolved
//! should be able to fire.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use pondy::actors::dropqueue::DropOldestQueue;
use pondy::actors::messages::ScraperCommand;
use pondy::actors::scraper::ScraperActor;
use pondy::model::{Severity, Target, TargetEndpoints, TargetType};
use tokio::sync::{broadcast, mpsc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn mock_metric_ok(server: &MockServer, metric_path: &str, statistic: &str, value: f64) {
    Mock::given(method("GET"))
        .and(path(format!("/actuator/metrics/{metric_path}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": metric_path,
            "measurements": [{ "statistic": statistic, "value": value }],
        })))
        .mount(server)
        .await;
}

async fn mock_metric_failing(server: &MockServer, metric_path: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/actuator/metrics/{metric_path}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

#[tokio::test]
async fn partial_scrape_zeroes_the_broken_field_and_keeps_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/actuator/metrics")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    mock_metric_ok(&server, "hikaricp.connections.active", "VALUE", 90.0).await;
    mock_metric_ok(&server, "hikaricp.connections.idle", "VALUE", 10.0).await;
    mock_metric_ok(&server, "hikaricp.connections.max", "VALUE", 100.0).await;
    mock_metric_ok(&server, "hikaricp.connections.pending", "VALUE", 0.0).await;
    mock_metric_ok(&server, "hikaricp.connections.timeout", "COUNT", 0.0).await;
    mock_metric_ok(&server, "hikaricp.connections.acquire", "VALUE", 0.0).await;
    // The JVM heap metric fails outright; every other jvm/process metric is
    // simply unmocked and falls back to wiremock's default 404.
    mock_metric_failing(&server, "jvm.memory.used?tag=area:heap").await;

    let target = Target {
        name: "partial-target".to_string(),
        group: String::new(),
        target_type: TargetType::Actuator,
        interval_secs: 3600,
        endpoints: TargetEndpoints::Single(server.uri()),
    };

    let (command_tx, command_rx) = mpsc::channel(4);
    let (status_tx, _status_rx) = broadcast::channel(4);
    let queue = Arc::new(DropOldestQueue::new(4));
    let actor = ScraperActor::new(target, command_rx, queue.clone(), status_tx, Arc::new(AtomicU64::new(0)));
    let actor_handle = tokio::spawn(actor.run());

    let (respond_to, rx) = tokio::sync::oneshot::channel();
    command_tx.send(ScraperCommand::PollNow { respond_to }).await.unwrap();
    rx.await.unwrap().unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), queue.pop()).await.expect("scrape should have produced a sample");

    assert_eq!(event.sample.active, 90, "working pool metrics must be captured");
    assert_eq!(event.sample.max, 100);
    assert_eq!(event.sample.heap_used, 0, "a failing metric fetch must default to zero, not abort the sample");

    // A rule over the working `usage` field should fire; a rule over the
    // broken `heap_usage` field should not, since the defaulted-to-zero
    // heap fields never cross a positive threshold.
    let pipeline = Pipeline::spawn(
        vec![
            rule("pool-usage-high", "usage > 50", Severity::Warning),
            rule("heap-usage-high", "heap_usage > 50", Severity::Warning),
        ],
        0,
    )
    .await;
    pipeline.send(sample_event("partial-target", "default", event.sample)).await;

    let pool_rule_fired = pipeline.store.get_active_alert_by_rule("partial-target", "default", "pool-usage-high").await.unwrap();
    assert!(pool_rule_fired.is_some(), "rule on a successfully scraped field must fire");

    let heap_rule_fired = pipeline.store.get_active_alert_by_rule("partial-target", "default", "heap-usage-high").await.unwrap();
    assert!(heap_rule_fired.is_none(), "rule on a field that failed to scrape must not fire");

    command_tx.send(ScraperCommand::Shutdown).await.unwrap();
    let _ = actor_handle.await;
    pipeline.shutdown().await;
}
