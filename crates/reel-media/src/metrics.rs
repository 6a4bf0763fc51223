//! Metrics collection for render stages.
//!
//! A [`MetricsCollector`] is created by the owner of the pipeline and handed
//! to each component. Clones share the same storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Metric value types.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(Vec<f64>),
}

/// Shared in-process metrics sink.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<HashMap<String, MetricValue>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter metric.
    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.add_counter(name, 1, labels);
    }

    /// Add `delta` to a counter metric.
    pub fn add_counter(&self, name: &str, delta: u64, labels: &[(&str, &str)]) {
        let key = make_key(name, labels);
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        let counter = metrics.entry(key).or_insert(MetricValue::Counter(0));
        if let MetricValue::Counter(value) = counter {
            *value += delta;
        }
    }

    /// Record a gauge metric.
    pub fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = make_key(name, labels);
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.insert(key, MetricValue::Gauge(value));
    }

    /// Record a histogram value.
    pub fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = make_key(name, labels);
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        let histogram = metrics
            .entry(key)
            .or_insert_with(|| MetricValue::Histogram(Vec::new()));
        if let MetricValue::Histogram(values) = histogram {
            values.push(value);
        }
    }

    /// Current counter value, 0 when never incremented.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.get(name, labels) {
            Some(MetricValue::Counter(v)) => v,
            _ => 0,
        }
    }

    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<MetricValue> {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics.get(&make_key(name, labels)).cloned()
    }

    /// Get snapshot of all metrics.
    pub fn snapshot(&self) -> HashMap<String, MetricValue> {
        self.metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Export metrics in Prometheus text format, sorted by key.
    pub fn prometheus_export(&self) -> String {
        let mut entries: Vec<_> = self.snapshot().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut output = String::new();
        for (key, value) in entries {
            let (name, labels) = split_key(&key);
            match value {
                MetricValue::Counter(count) => {
                    output.push_str(&format!("# TYPE {} counter\n", name));
                    output.push_str(&format!("{} {}\n", key, count));
                }
                MetricValue::Gauge(value) => {
                    output.push_str(&format!("# TYPE {} gauge\n", name));
                    output.push_str(&format!("{} {}\n", key, value));
                }
                MetricValue::Histogram(values) if !values.is_empty() => {
                    let sum: f64 = values.iter().sum();
                    output.push_str(&format!("# TYPE {} summary\n", name));
                    output.push_str(&format!("{}_count{} {}\n", name, labels, values.len()));
                    output.push_str(&format!("{}_sum{} {}\n", name, labels, sum));
                }
                MetricValue::Histogram(_) => {}
            }
        }
        output
    }
}

fn make_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        name.to_string()
    } else {
        let label_str = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}}", name, label_str)
    }
}

fn split_key(key: &str) -> (&str, &str) {
    match key.find('{') {
        Some(start) => (&key[..start], &key[start..]),
        None => (key, ""),
    }
}
