//! Analytics: stateless, deterministic computations over Store ranges.
//!
//! Pull-based (unlike the actors): nothing here owns an event loop, so each
//! function is a plain async call against a `&dyn StorageBackend`, wrapping
//! a pure compute kernel that takes an already-fetched `&[Sample]`. The
//! split keeps the interesting logic unit-testable with hand-built
//! fixtures, the same way `store/memory.rs`'s `MemoryBackend` stands in for
//! a real backend in actor tests.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::model::{Sample, Severity};
use crate::store::backend::QueryRange;
use crate::store::error::StoreResult;
use crate::store::StorageBackend;

const DEFAULT_RANGE: ChronoDuration = ChronoDuration::hours(24);

async fn fetch_samples(
    backend: &dyn StorageBackend,
    target: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> StoreResult<Vec<Sample>> {
    let rows = backend
        .query_range(QueryRange {
            target: target.to_string(),
            instance: None,
            from,
            to,
        })
        .await?;
    Ok(rows.into_iter().map(|(_, sample)| sample).collect())
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64], avg: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

// ---------------------------------------------------------------------
// Recommend
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    IncreasePoolMax,
    DecreasePoolMax,
    IncreaseHeap,
    InvestigateCpu,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub severity: Severity,
    pub reason: String,
    pub current: f64,
    pub recommended: f64,
}

pub async fn recommend(backend: &dyn StorageBackend, target: &str, now: DateTime<Utc>) -> StoreResult<Vec<Recommendation>> {
    let samples = fetch_samples(backend, target, now - DEFAULT_RANGE, now).await?;
    Ok(compute_recommendations(&samples))
}

fn compute_recommendations(samples: &[Sample]) -> Vec<Recommendation> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let n = samples.len() as f64;
    let current_max = samples.last().map(|s| s.max).unwrap_or(0);

    let peak_high_frac = samples.iter().filter(|s| s.usage_pct() >= 95.0).count() as f64 / n;
    if peak_high_frac >= 0.05 {
        let severity = if peak_high_frac >= 0.20 { Severity::Critical } else { Severity::Warning };
        out.push(Recommendation {
            kind: RecommendationKind::IncreasePoolMax,
            severity,
            reason: format!("pool usage reached >=95% in {:.0}% of samples", peak_high_frac * 100.0),
            current: current_max as f64,
            recommended: (current_max as f64 * 1.5).ceil(),
        });
    }

    let sustained_low_frac = samples.iter().filter(|s| s.usage_pct() <= 10.0).count() as f64 / n;
    if sustained_low_frac >= 0.70 {
        let mut actives: Vec<f64> = samples.iter().map(|s| s.active as f64).collect();
        actives.sort_by(|a, b| a.total_cmp(b));
        let p95_active = percentile(&actives, 95.0);
        out.push(Recommendation {
            kind: RecommendationKind::DecreasePoolMax,
            severity: Severity::Info,
            reason: format!("pool usage stayed <=10% in {:.0}% of samples", sustained_low_frac * 100.0),
            current: current_max as f64,
            recommended: (p95_active * 1.2).ceil(),
        });
    }

    let heap_high_frac = samples.iter().filter(|s| s.heap_pct() >= 95.0).count() as f64 / n;
    if heap_high_frac >= 0.05 {
        let current_heap_max = samples.last().map(|s| s.heap_max).unwrap_or(0);
        out.push(Recommendation {
            kind: RecommendationKind::IncreaseHeap,
            severity: if heap_high_frac >= 0.20 { Severity::Critical } else { Severity::Warning },
            reason: format!("heap usage reached >=95% in {:.0}% of samples", heap_high_frac * 100.0),
            current: current_heap_max as f64,
            recommended: (current_heap_max as f64 * 1.5).ceil(),
        });
    }

    let avg_cpu = mean(&samples.iter().map(|s| s.cpu_usage_ratio * 100.0).collect::<Vec<_>>());
    if avg_cpu >= 85.0 {
        out.push(Recommendation {
            kind: RecommendationKind::InvestigateCpu,
            severity: Severity::Warning,
            reason: format!("average CPU usage is {avg_cpu:.1}%"),
            current: avg_cpu,
            recommended: 70.0,
        });
    }

    out
}

// ---------------------------------------------------------------------
// PeakTime
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    pub hour: u32,
    pub avg_usage: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakTimeReport {
    pub buckets: Vec<HourlyBucket>,
    pub peak_hours: Vec<u32>,
    pub busiest_hour: Option<u32>,
    pub quietest_hour: Option<u32>,
    pub summary: String,
}

pub async fn peak_time(
    backend: &dyn StorageBackend,
    target: &str,
    tz: Tz,
    now: DateTime<Utc>,
) -> StoreResult<PeakTimeReport> {
    let samples = fetch_samples(backend, target, now - DEFAULT_RANGE, now).await?;
    Ok(compute_peak_time(&samples, tz))
}

fn compute_peak_time(samples: &[Sample], tz: Tz) -> PeakTimeReport {
    let mut buckets: Vec<(Vec<f64>, usize)> = vec![(Vec::new(), 0); 24];
    for sample in samples {
        let hour = sample.ts.with_timezone(&tz).hour() as usize;
        buckets[hour].0.push(sample.usage_pct());
        buckets[hour].1 += 1;
    }

    let hourly: Vec<HourlyBucket> = buckets
        .iter()
        .enumerate()
        .map(|(hour, (values, count))| HourlyBucket {
            hour: hour as u32,
            avg_usage: mean(values),
            sample_count: *count,
        })
        .collect();

    if samples.is_empty() {
        return PeakTimeReport {
            buckets: hourly,
            peak_hours: Vec::new(),
            busiest_hour: None,
            quietest_hour: None,
            summary: "no data available".to_string(),
        };
    }

    let occupied: Vec<&HourlyBucket> = hourly.iter().filter(|b| b.sample_count > 0).collect();
    let avgs: Vec<f64> = occupied.iter().map(|b| b.avg_usage).collect();
    let overall_mean = mean(&avgs);
    let overall_std = std_dev(&avgs, overall_mean);
    let threshold = overall_mean + overall_std;

    let mut ranked = occupied.clone();
    ranked.sort_by(|a, b| b.avg_usage.total_cmp(&a.avg_usage));

    let peak_hours: Vec<u32> = ranked
        .iter()
        .filter(|b| b.avg_usage >= threshold)
        .take(3)
        .map(|b| b.hour)
        .collect();

    let busiest_hour = ranked.first().map(|b| b.hour);
    let quietest_hour = ranked.last().map(|b| b.hour);

    let summary = match (busiest_hour, quietest_hour) {
        (Some(busy), Some(quiet)) => {
            format!("busiest around {busy:02}:00, quietest around {quiet:02}:00; consider scheduling maintenance near {quiet:02}:00")
        }
        _ => "insufficient data to determine a pattern".to_string(),
    };

    PeakTimeReport {
        buckets: hourly,
        peak_hours,
        busiest_hour,
        quietest_hour,
        summary,
    }
}

// ---------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    fn k(self) -> f64 {
        match self {
            Sensitivity::Low => 3.0,
            Sensitivity::Medium => 2.5,
            Sensitivity::High => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyPoint {
    pub ts: DateTime<Utc>,
    pub value: f64,
    pub deviation: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Normal,
    Elevated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub points: Vec<AnomalyPoint>,
    pub risk_level: RiskLevel,
}

const MIN_ANOMALY_SAMPLES: usize = 20;
const ROLLING_WINDOW: ChronoDuration = ChronoDuration::hours(1);

pub async fn anomalies(
    backend: &dyn StorageBackend,
    target: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    sensitivity: Sensitivity,
) -> StoreResult<AnomalyReport> {
    let samples = fetch_samples(backend, target, from, to).await?;
    Ok(compute_anomalies(&samples, sensitivity))
}

fn compute_anomalies(samples: &[Sample], sensitivity: Sensitivity) -> AnomalyReport {
    if samples.len() < MIN_ANOMALY_SAMPLES {
        return AnomalyReport {
            points: Vec::new(),
            risk_level: RiskLevel::Normal,
        };
    }

    let k = sensitivity.k();
    let mut points = Vec::new();

    for (i, sample) in samples.iter().enumerate() {
        let window: Vec<f64> = samples[..=i]
            .iter()
            .rev()
            .take_while(|s| sample.ts - s.ts <= ROLLING_WINDOW)
            .map(|s| s.usage_pct())
            .collect();

        if window.len() < 2 {
            continue;
        }

        let avg = mean(&window);
        let sigma = std_dev(&window, avg);
        if sigma == 0.0 {
            continue;
        }

        let value = sample.usage_pct();
        let deviation = (value - avg).abs() / sigma;
        if deviation > k {
            let severity = if deviation > 3.5 { Severity::Critical } else { Severity::Warning };
            points.push(AnomalyPoint {
                ts: sample.ts,
                value,
                deviation,
                severity,
            });
        }
    }

    let risk_level = if points.iter().any(|p| p.severity == Severity::Critical) {
        RiskLevel::Elevated
    } else {
        RiskLevel::Normal
    };

    AnomalyReport { points, risk_level }
}

// ---------------------------------------------------------------------
// Compare
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparePeriod {
    Day,
    Week,
}

impl ComparePeriod {
    fn duration(self) -> ChronoDuration {
        match self {
            ComparePeriod::Day => ChronoDuration::days(1),
            ComparePeriod::Week => ChronoDuration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowStats {
    pub avg_usage: f64,
    pub max_usage: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub current: WindowStats,
    pub previous: WindowStats,
    pub trend: Trend,
}

pub async fn compare(
    backend: &dyn StorageBackend,
    target: &str,
    period: ComparePeriod,
    now: DateTime<Utc>,
) -> StoreResult<ComparisonReport> {
    let span = period.duration();
    let current = fetch_samples(backend, target, now - span, now).await?;
    let previous = fetch_samples(backend, target, now - span * 2, now - span).await?;
    Ok(compute_comparison(&current, &previous))
}

fn window_stats(samples: &[Sample]) -> WindowStats {
    let usages: Vec<f64> = samples.iter().map(|s| s.usage_pct()).collect();
    WindowStats {
        avg_usage: mean(&usages),
        max_usage: usages.iter().cloned().fold(0.0, f64::max),
        sample_count: samples.len(),
    }
}

fn compute_comparison(current: &[Sample], previous: &[Sample]) -> ComparisonReport {
    let current_stats = window_stats(current);
    let previous_stats = window_stats(previous);

    let trend = if current_stats.avg_usage < previous_stats.avg_usage - 5.0 {
        Trend::Improving
    } else if current_stats.avg_usage > previous_stats.avg_usage + 5.0 {
        Trend::Degrading
    } else {
        Trend::Stable
    };

    ComparisonReport {
        current: current_stats,
        previous: previous_stats,
        trend,
    }
}

// ---------------------------------------------------------------------
// LeakRisk
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakRiskLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakRiskReport {
    pub risk: LeakRiskLevel,
    pub health_score: f64,
    pub indicators: Vec<String>,
}

const LEAK_WINDOW: ChronoDuration = ChronoDuration::hours(2);

pub async fn leak_risk(backend: &dyn StorageBackend, target: &str, now: DateTime<Utc>) -> StoreResult<LeakRiskReport> {
    let samples = fetch_samples(backend, target, now - LEAK_WINDOW, now).await?;
    Ok(compute_leak_risk(&samples))
}

fn compute_leak_risk(samples: &[Sample]) -> LeakRiskReport {
    if samples.len() < 2 {
        return LeakRiskReport {
            risk: LeakRiskLevel::None,
            health_score: 100.0,
            indicators: Vec::new(),
        };
    }

    let mut indicators = Vec::new();
    let mut penalty = 0.0;

    let actives: Vec<f64> = samples.iter().map(|s| s.active as f64).collect();
    let rising = actives.windows(2).filter(|w| w[1] >= w[0]).count() as f64 / (actives.len() - 1) as f64;
    let monotonic_rising = rising >= 0.90;
    if monotonic_rising {
        indicators.push("active connections trending upward without resolution".to_string());
        penalty += 30.0;
    }

    let idles: Vec<f64> = samples.iter().map(|s| s.idle as f64).collect();
    let idle_trending_to_zero = idles.last().copied().unwrap_or(0.0) <= idles.first().copied().unwrap_or(0.0) * 0.2;
    if idle_trending_to_zero {
        indicators.push("idle connections trending toward zero".to_string());
        penalty += 25.0;
    }

    let pending_frac = samples.iter().filter(|s| s.pending > 0).count() as f64 / samples.len() as f64;
    let sustained_pending = pending_frac >= 0.20;
    if sustained_pending {
        indicators.push(format!("pending acquisitions present in {:.0}% of samples", pending_frac * 100.0));
        penalty += 25.0;
    }

    let resolved = samples
        .windows(2)
        .any(|w| w[0].active > w[1].active && (w[0].active - w[1].active) as f64 >= w[0].max as f64 * 0.10);
    if !resolved {
        indicators.push("no significant drop in active connections observed".to_string());
        penalty += 20.0;
    }

    let risk = match (monotonic_rising, idle_trending_to_zero, sustained_pending, resolved) {
        (true, true, true, false) => LeakRiskLevel::High,
        (true, true, _, false) | (true, _, true, false) => LeakRiskLevel::Medium,
        (true, ..) | (_, true, ..) | (.., true, _) => LeakRiskLevel::Low,
        _ => LeakRiskLevel::None,
    };

    LeakRiskReport {
        risk,
        health_score: (100.0 - penalty).max(0.0),
        indicators,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_at(hour_offset: i64, active: u32, max: u32) -> Sample {
        Sample {
            ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::hours(hour_offset),
            active,
            idle: max.saturating_sub(active),
            pending: 0,
            max,
            timeout_count: 0,
            acquire_p99_seconds: 0.0,
            heap_used: 0,
            heap_max: 100,
            nonheap_used: 0,
            threads_live: 10,
            cpu_usage_ratio: 0.2,
            gc_count: 0,
            gc_total_seconds: 0.0,
        }
    }

    #[test]
    fn recommend_empty_range_returns_empty() {
        assert!(compute_recommendations(&[]).is_empty());
    }

    #[test]
    fn recommend_flags_sustained_high_usage() {
        let samples: Vec<Sample> = (0..20).map(|i| sample_at(i, 98, 100)).collect();
        let recs = compute_recommendations(&samples);
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::IncreasePoolMax));
    }

    #[test]
    fn recommend_flags_sustained_low_usage() {
        let samples: Vec<Sample> = (0..20).map(|i| sample_at(i, 1, 100)).collect();
        let recs = compute_recommendations(&samples);
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::DecreasePoolMax));
    }

    #[test]
    fn peak_time_empty_range_returns_well_formed_empty() {
        let report = compute_peak_time(&[], chrono_tz::UTC);
        assert_eq!(report.buckets.len(), 24);
        assert!(report.peak_hours.is_empty());
        assert!(report.busiest_hour.is_none());
    }

    #[test]
    fn peak_time_finds_busiest_hour() {
        let mut samples = Vec::new();
        for day in 0..3 {
            samples.push(sample_at(day * 24 + 9, 95, 100));
            samples.push(sample_at(day * 24 + 2, 5, 100));
        }
        let report = compute_peak_time(&samples, chrono_tz::UTC);
        assert_eq!(report.busiest_hour, Some(9));
        assert_eq!(report.quietest_hour, Some(2));
    }

    #[test]
    fn anomalies_below_minimum_sample_count_returns_normal() {
        let samples: Vec<Sample> = (0..5).map(|i| sample_at(i, 50, 100)).collect();
        let report = compute_anomalies(&samples, Sensitivity::Medium);
        assert!(report.points.is_empty());
        assert_eq!(report.risk_level, RiskLevel::Normal);
    }

    #[test]
    fn anomalies_flags_a_spike() {
        let mut samples: Vec<Sample> = (0..30)
            .map(|i| Sample {
                ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(i * 2),
                ..sample_at(0, 50, 100)
            })
            .collect();
        let last = samples.len() - 1;
        samples[last].active = 99;
        let report = compute_anomalies(&samples, Sensitivity::High);
        assert!(!report.points.is_empty());
    }

    #[test]
    fn compare_detects_degrading_trend() {
        let current: Vec<Sample> = (0..10).map(|i| sample_at(i, 90, 100)).collect();
        let previous: Vec<Sample> = (0..10).map(|i| sample_at(i, 50, 100)).collect();
        let report = compute_comparison(&current, &previous);
        assert_eq!(report.trend, Trend::Degrading);
    }

    #[test]
    fn compare_detects_stable_trend() {
        let current: Vec<Sample> = (0..10).map(|i| sample_at(i, 50, 100)).collect();
        let previous: Vec<Sample> = (0..10).map(|i| sample_at(i, 51, 100)).collect();
        let report = compute_comparison(&current, &previous);
        assert_eq!(report.trend, Trend::Stable);
    }

    #[test]
    fn leak_risk_flat_usage_is_no_risk() {
        let samples: Vec<Sample> = (0..10).map(|i| sample_at(i, 20, 100)).collect();
        let report = compute_leak_risk(&samples);
        assert_eq!(report.risk, LeakRiskLevel::None);
        assert_eq!(report.health_score, 100.0);
    }

    #[test]
    fn leak_risk_flags_rising_active_with_no_resolution() {
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample {
                pending: 1,
                ..sample_at(i, 10 + i as u32 * 8, 100)
            })
            .collect();
        let report = compute_leak_risk(&samples);
        assert_ne!(report.risk, LeakRiskLevel::None);
        assert!(report.health_score < 100.0);
    }
}
