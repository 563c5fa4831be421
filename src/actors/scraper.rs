//! ScraperActor — periodically fetches all instances of a single Target
//! from its Actuator endpoints, decodes the fixed metric catalogue, and
//! emits a `Sample` per instance.
//!
//! Grounded on `actors/collector.rs`'s `MetricCollectorActor`: one
//! `reqwest::Client` built once in `new`, a `tokio::select!` loop over
//! `ticker.tick()`/`command_rx.recv()`/an `else` arm, reused across every
//! tick and instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use super::dropqueue::DropOldestQueue;
use super::messages::{SampleEvent, ScraperCommand, TargetStatusEvent};
use crate::model::{Sample, Target};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const HEADER_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    measurements: Vec<Measurement>,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    statistic: String,
    value: f64,
}

impl MetricsResponse {
    fn stat(&self, statistic: &str) -> f64 {
        self.measurements
            .iter()
            .find(|m| m.statistic == statistic)
            .map(|m| m.value)
            .unwrap_or(0.0)
    }
}

/// The fixed catalogue of per-instance Actuator metric paths, per
/// `SPEC_FULL.md` §4.2.
const CATALOGUE: &[(&str, &str)] = &[
    ("pool_active", "hikaricp.connections.active"),
    ("pool_idle", "hikaricp.connections.idle"),
    ("pool_pending", "hikaricp.connections.pending"),
    ("pool_max", "hikaricp.connections.max"),
    ("pool_timeout", "hikaricp.connections.timeout"),
    ("pool_acquire", "hikaricp.connections.acquire"),
    ("jvm_heap_used", "jvm.memory.used?tag=area:heap"),
    ("jvm_nonheap_used", "jvm.memory.used?tag=area:nonheap"),
    ("jvm_heap_max", "jvm.memory.max?tag=area:heap"),
    ("jvm_threads_live", "jvm.threads.live"),
    ("process_cpu_usage", "process.cpu.usage"),
    ("jvm_gc_pause", "jvm.gc.pause"),
];

pub struct ScraperActor {
    target: Target,
    client: reqwest::Client,
    command_rx: mpsc::Receiver<ScraperCommand>,
    sink: Arc<DropOldestQueue<SampleEvent>>,
    status_tx: broadcast::Sender<TargetStatusEvent>,
    consecutive_failures: Arc<Mutex<HashMap<String, u32>>>,
    samples_dropped: Arc<AtomicU64>,
    in_flight: Option<JoinHandle<()>>,
    in_flight_since: Option<std::time::Instant>,
}

impl ScraperActor {
    pub fn new(
        target: Target,
        command_rx: mpsc::Receiver<ScraperCommand>,
        sink: Arc<DropOldestQueue<SampleEvent>>,
        status_tx: broadcast::Sender<TargetStatusEvent>,
        samples_dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            target,
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            command_rx,
            sink,
            status_tx,
            consecutive_failures: Arc::new(Mutex::new(HashMap::new())),
            samples_dropped,
            in_flight: None,
            in_flight_since: None,
        }
    }

    #[instrument(skip(self), fields(target = %self.target.name))]
    pub async fn run(mut self) {
        debug!("starting scraper actor");
        let mut ticker = interval(Duration::from_secs(self.target.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ScraperCommand::PollNow { respond_to } => {
                            self.scrape_now().await;
                            let _ = respond_to.send(Ok(()));
                        }
                        ScraperCommand::Reconfigure { target } => {
                            debug!("reconfiguring target '{}'", target.name);
                            let new_interval = Duration::from_secs(target.interval_secs);
                            self.target = target;
                            ticker = interval(new_interval);
                        }
                        ScraperCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        if let Some(handle) = self.in_flight.take() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }

        debug!("scraper actor stopped");
    }

    /// A previous scrape still running past `2 × interval` means the new
    /// tick is skipped outright rather than queued, per `SPEC_FULL.md` §4.2.
    async fn tick(&mut self) {
        if let Some(handle) = &self.in_flight {
            if !handle.is_finished() {
                let overrun_deadline = Duration::from_secs(self.target.interval_secs) * 2;
                let elapsed = self.in_flight_since.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed > overrun_deadline {
                    warn!(
                        "scrape overrun for target '{}' ({:.1}s past 2x interval), skipping tick",
                        self.target.name,
                        elapsed.as_secs_f64()
                    );
                }
                return;
            }
        }
        self.spawn_scrape();
    }

    async fn scrape_now(&mut self) {
        self.spawn_scrape();
        if let Some(handle) = self.in_flight.take() {
            let _ = handle.await;
        }
    }

    fn spawn_scrape(&mut self) {
        let target = self.target.clone();
        let client = self.client.clone();
        let sink = self.sink.clone();
        let status_tx = self.status_tx.clone();
        let failures = self.consecutive_failures.clone();
        let samples_dropped = self.samples_dropped.clone();

        self.in_flight_since = Some(std::time::Instant::now());
        self.in_flight = Some(tokio::spawn(async move {
            scrape_target(&target, &client, &sink, &status_tx, &failures, &samples_dropped).await;
        }));
    }
}

#[instrument(skip(client, sink, status_tx, failures, samples_dropped), fields(target = %target.name))]
async fn scrape_target(
    target: &Target,
    client: &reqwest::Client,
    sink: &DropOldestQueue<SampleEvent>,
    status_tx: &broadcast::Sender<TargetStatusEvent>,
    failures: &Mutex<HashMap<String, u32>>,
    samples_dropped: &AtomicU64,
) {
    let per_request_timeout = Duration::from_secs(target.interval_secs).min(HEADER_TIMEOUT);

    let fetches = target.instances().into_iter().map(|instance| {
        let client = client.clone();
        async move {
            (instance.id.clone(), scrape_instance(&client, &instance.endpoint, per_request_timeout).await)
        }
    });

    let results = join_all(fetches).await;

    for (instance_id, (sample, failed)) in results {
        let crossed_offline = {
            let mut failures = failures.lock().expect("consecutive-failure map poisoned");
            let count = failures.entry(instance_id.clone()).or_insert(0);
            if failed {
                *count += 1;
            } else {
                let was_offline = *count >= CONSECUTIVE_FAILURE_THRESHOLD;
                *count = 0;
                if was_offline {
                    let _ = status_tx.send(TargetStatusEvent {
                        target_name: target.name.clone(),
                        instance_name: instance_id.clone(),
                        online: true,
                        timestamp: Utc::now(),
                    });
                }
            }
            *count == CONSECUTIVE_FAILURE_THRESHOLD
        };

        if crossed_offline {
            let _ = status_tx.send(TargetStatusEvent {
                target_name: target.name.clone(),
                instance_name: instance_id.clone(),
                online: false,
                timestamp: Utc::now(),
            });
        }

        let dropped = sink.push(SampleEvent {
            target_name: target.name.clone(),
            instance_name: instance_id,
            sample,
        });
        if dropped {
            samples_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("supervisor queue full for target '{}', dropped oldest sample", target.name);
        }
    }
}

/// Fetch every metric in the catalogue for one instance, concurrently, and
/// compose a `Sample`. A failed individual fetch sets that field to 0 and
/// is reflected in the returned `failed` flag; it never suppresses the
/// Sample (partial samples beat gaps).
async fn scrape_instance(client: &reqwest::Client, endpoint: &str, timeout: Duration) -> (Sample, bool) {
    let _ = client
        .get(format!("{endpoint}/actuator/metrics"))
        .timeout(timeout)
        .send()
        .await;

    let fetches = CATALOGUE.iter().map(|(field, path)| {
        let client = client.clone();
        let url = format!("{endpoint}/actuator/metrics/{path}");
        async move { (*field, fetch_metric(&client, &url, timeout).await) }
    });

    let results: HashMap<&str, Option<MetricsResponse>> = join_all(fetches).await.into_iter().collect();
    let any_failed = results.values().any(Option::is_none);

    let value = |field: &str| -> f64 {
        results.get(field).and_then(|m| m.as_ref()).map(|m| m.stat("VALUE")).unwrap_or(0.0)
    };
    let count = |field: &str| -> f64 {
        results.get(field).and_then(|m| m.as_ref()).map(|m| m.stat("COUNT")).unwrap_or(0.0)
    };
    let total_time = |field: &str| -> f64 {
        results.get(field).and_then(|m| m.as_ref()).map(|m| m.stat("TOTAL_TIME")).unwrap_or(0.0)
    };

    let sample = Sample {
        ts: Utc::now(),
        active: value("pool_active") as u32,
        idle: value("pool_idle") as u32,
        pending: value("pool_pending") as u32,
        max: value("pool_max") as u32,
        timeout_count: count("pool_timeout") as u32,
        acquire_p99_seconds: value("pool_acquire"),
        heap_used: value("jvm_heap_used") as u64,
        heap_max: value("jvm_heap_max") as u64,
        nonheap_used: value("jvm_nonheap_used") as u64,
        threads_live: value("jvm_threads_live") as u32,
        cpu_usage_ratio: value("process_cpu_usage"),
        gc_count: count("jvm_gc_pause") as u32,
        gc_total_seconds: total_time("jvm_gc_pause"),
    };

    (sample, any_failed)
}

async fn fetch_metric(client: &reqwest::Client, url: &str, timeout: Duration) -> Option<MetricsResponse> {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => match response.json::<MetricsResponse>().await {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                error!("failed to decode metric response from '{url}': {e}");
                None
            }
        },
        Ok(response) => {
            error!("metric fetch from '{url}' returned status {}", response.status());
            None
        }
        Err(e) => {
            error!("metric fetch from '{url}' failed: {e}");
            None
        }
    }
}
