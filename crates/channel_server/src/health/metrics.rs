//! Metrics collection for the tick and the workers.
//!
//! Everything here is called from worker threads and the tick, never from
//! async code, so the maps are `DashMap`s rather than async locks.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Metrics collector for server performance data
#[derive(Debug)]
pub struct MetricsCollector {
    counters: DashMap<String, u64>,
    gauges: DashMap<String, f64>,
    histograms: DashMap<String, Histogram>,
    start_time: Instant,
}

/// Histogram of durations in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub upper_bound: f64,
    pub count: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            start_time: Instant::now(),
        }
    }

    pub fn increment_counter(&self, name: &str, value: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .entry(name.to_string())
            .or_default()
            .record(value);
    }

    pub fn record_duration(&self, name: &str, duration: Duration) {
        self.record_histogram(name, duration.as_secs_f64());
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|value| *value).unwrap_or(0)
    }

    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|value| *value)
    }

    pub fn get_histogram(&self, name: &str) -> Option<Histogram> {
        self.histograms.get(name).map(|histogram| histogram.clone())
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Copies every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            counters: self
                .counters
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    /// Exports metrics in Prometheus text format, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let mut counters: Vec<_> = snapshot.counters.iter().collect();
        counters.sort();
        for (name, value) in counters {
            output.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, value));
        }

        let mut gauges: Vec<_> = snapshot.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in gauges {
            output.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, value));
        }

        let mut histograms: Vec<_> = snapshot.histograms.iter().collect();
        histograms.sort_by(|a, b| a.0.cmp(b.0));
        for (name, histogram) in histograms {
            output.push_str(&format!("# TYPE {} histogram\n", name));
            output.push_str(&format!("{}_count {}\n", name, histogram.count));
            output.push_str(&format!("{}_sum {}\n", name, histogram.sum));
            for bucket in &histogram.buckets {
                output.push_str(&format!(
                    "{}_bucket{{le=\"{}\"}} {}\n",
                    name, bucket.upper_bound, bucket.count
                ));
            }
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, Histogram>,
}

impl Histogram {
    /// Buckets sized for tick steps: 10 µs up to one second.
    pub fn new() -> Self {
        let buckets = [
            0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
        ]
        .into_iter()
        .map(|upper_bound| HistogramBucket {
            upper_bound,
            count: 0,
        })
        .collect();

        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            buckets,
        }
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        for bucket in &mut self.buckets {
            if value <= bucket.upper_bound {
                bucket.count += 1;
            }
        }
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Upper bound of the first bucket holding the `p`th percentile.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = (self.count as f64 * p / 100.0).ceil() as u64;
        self.buckets
            .iter()
            .find(|bucket| bucket.count >= target)
            .map(|bucket| bucket.upper_bound)
            .unwrap_or(self.max)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
