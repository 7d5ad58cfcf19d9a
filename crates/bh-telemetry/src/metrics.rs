use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

use ahash::AHashMap;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A label set is a sorted list of key=value pairs distinguishing counter
/// families.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Counters plus a single request-duration accumulator. Thread-safe through
/// a read-write lock for registration and atomics for values.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<(String, Labels), AtomicU64>>,
    duration_micros_sum: AtomicU64,
    duration_count: AtomicU64,
}

impl MetricsCollector {
    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let counters = self.counters.read().expect("metrics lock poisoned");
            if let Some(counter) = counters.get(&key) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().expect("metrics lock poisoned");
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        self.counters
            .read()
            .expect("metrics lock poisoned")
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn record_duration(&self, seconds: f64) {
        self.duration_micros_sum
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        self.duration_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.duration_count.load(Ordering::Relaxed)
    }
}

static GLOBAL: OnceLock<MetricsCollector> = OnceLock::new();

/// The process-wide collector used by the middleware.
pub fn global_metrics() -> &'static MetricsCollector {
    GLOBAL.get_or_init(MetricsCollector::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let m = MetricsCollector::default();
        m.increment_counter("requests", &[("path", "/v1/status"), ("method", "GET")]);
        m.increment_counter("requests", &[("method", "GET"), ("path", "/v1/status")]);
        m.increment_counter("requests", &[("method", "POST"), ("path", "/v1/status")]);

        // Label order must not matter.
        assert_eq!(
            m.counter_value("requests", &[("path", "/v1/status"), ("method", "GET")]),
            2
        );
        assert_eq!(
            m.counter_value("requests", &[("path", "/v1/status"), ("method", "POST")]),
            1
        );
    }

    #[test]
    fn durations_count() {
        let m = MetricsCollector::default();
        m.record_duration(0.25);
        m.record_duration(0.5);
        assert_eq!(m.request_count(), 2);
    }
}
