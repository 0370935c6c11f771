//! In-process metrics: counters, histograms, gauges, uptime.
//!
//! Everything sits behind one mutex; the hot path is a counter increment.
//! Histograms keep a bounded ring of samples and derive their statistics on
//! read.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Samples kept per histogram key.
const HISTOGRAM_CAP: usize = 1000;

/// Metric identity: name plus sorted tag pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    name: String,
    tags: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, tags: &[(&str, &str)]) -> Self {
        let mut tags: Vec<(String, String)> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        tags.sort();
        Self {
            name: name.to_string(),
            tags,
        }
    }

    fn render(&self) -> String {
        if self.tags.is_empty() {
            return self.name.clone();
        }
        let tags: Vec<String> = self
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}{{{}}}", self.name, tags.join(","))
    }
}

#[derive(Default)]
struct Ring {
    samples: VecDeque<f64>,
}

impl Ring {
    fn record(&mut self, value: f64) {
        if self.samples.len() == HISTOGRAM_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn stats(&self) -> HistogramStats {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        if count == 0 {
            return HistogramStats::default();
        }
        let sum: f64 = sorted.iter().sum();
        HistogramStats {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sum / count as f64,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile over a sorted sample set.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Read-side snapshot rendered by the introspection tool.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramStats>,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<MetricKey, u64>,
    gauges: HashMap<MetricKey, f64>,
    histograms: HashMap<MetricKey, Ring>,
}

/// Process-wide metrics registry.
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    started: Mutex<Instant>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            started: Mutex::new(Instant::now()),
        }
    }

    pub fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) {
        self.add_to_counter(name, tags, 1);
    }

    pub fn add_to_counter(&self, name: &str, tags: &[(&str, &str)], by: u64) {
        let key = MetricKey::new(name, tags);
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner.counters.entry(key).or_insert(0) += by;
    }

    pub fn set_gauge(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, tags);
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.gauges.insert(key, value);
    }

    pub fn record_duration(&self, name: &str, tags: &[(&str, &str)], duration: Duration) {
        self.record_value(name, tags, duration.as_secs_f64() * 1000.0);
    }

    pub fn record_value(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, tags);
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.histograms.entry(key).or_default().record(value);
    }

    pub fn uptime(&self) -> Duration {
        self.started.lock().expect("metrics lock poisoned").elapsed()
    }

    pub fn reset_uptime(&self) {
        *self.started.lock().expect("metrics lock poisoned") = Instant::now();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            counters: inner
                .counters
                .iter()
                .map(|(key, value)| (key.render(), *value))
                .collect(),
            gauges: inner
                .gauges
                .iter()
                .map(|(key, value)| (key.render(), *value))
                .collect(),
            histograms: inner
                .histograms
                .iter()
                .map(|(key, ring)| (key.render(), ring.stats()))
                .collect(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_tag_set() {
        let metrics = MetricsRegistry::new();
        metrics.increment_counter("tool_calls", &[("tool", "wiql-query")]);
        metrics.increment_counter("tool_calls", &[("tool", "wiql-query")]);
        metrics.increment_counter("tool_calls", &[("tool", "bulk-comment")]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters["tool_calls{tool=wiql-query}"], 2);
        assert_eq!(snapshot.counters["tool_calls{tool=bulk-comment}"], 1);
    }

    #[test]
    fn tag_order_does_not_split_keys() {
        let metrics = MetricsRegistry::new();
        metrics.increment_counter("x", &[("a", "1"), ("b", "2")]);
        metrics.increment_counter("x", &[("b", "2"), ("a", "1")]);
        assert_eq!(metrics.snapshot().counters["x{a=1,b=2}"], 2);
    }

    #[test]
    fn gauges_are_last_write_wins() {
        let metrics = MetricsRegistry::new();
        metrics.set_gauge("handles_live", &[], 4.0);
        metrics.set_gauge("handles_live", &[], 2.0);
        assert_eq!(metrics.snapshot().gauges["handles_live"], 2.0);
    }

    #[test]
    fn histogram_stats_cover_percentiles() {
        let metrics = MetricsRegistry::new();
        for i in 1..=100 {
            metrics.record_value("latency_ms", &[], i as f64);
        }
        let stats = &metrics.snapshot().histograms["latency_ms"];
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert!((stats.mean - 50.5).abs() < 1e-9);
        assert_eq!(stats.p50, 50.0);
        assert_eq!(stats.p95, 95.0);
        assert_eq!(stats.p99, 99.0);
    }

    #[test]
    fn histogram_ring_is_bounded() {
        let metrics = MetricsRegistry::new();
        for i in 0..(HISTOGRAM_CAP + 500) {
            metrics.record_value("big", &[], i as f64);
        }
        let stats = &metrics.snapshot().histograms["big"];
        assert_eq!(stats.count, HISTOGRAM_CAP);
        // Oldest samples fell off the ring.
        assert_eq!(stats.min, 500.0);
    }

    #[test]
    fn uptime_resets() {
        let metrics = MetricsRegistry::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(metrics.uptime() >= Duration::from_millis(5));
        metrics.reset_uptime();
        assert!(metrics.uptime() < Duration::from_millis(5));
    }
}
