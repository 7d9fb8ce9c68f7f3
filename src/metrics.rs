use crate::http::Status;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple counter that can be incremented atomically
#[derive(Debug)]
pub struct Counter {
    value: AtomicUsize,
}

impl Counter {
    /// Create a new counter with an initial value
    pub fn new(initial_value: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial_value),
        }
    }

    /// Increment the counter by a specific amount
    pub fn increment(&self, amount: usize) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get the current value of the counter
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A value that goes up and down, remembering its highest point
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the gauge by one and update the peak
    pub fn increment(&self) {
        let current = self.value.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
    }

    /// Lower the gauge by one
    pub fn decrement(&self) {
        // Saturate at zero rather than wrap
        let _ = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    pub fn value(&self) -> usize {
        self.value.load(Ordering::SeqCst)
    }

    /// Highest value ever observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A histogram for tracking distribution of values
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<(f64, AtomicUsize)>,
    count: AtomicUsize,
    sum: AtomicUsize,
    min: AtomicUsize,
    max: AtomicUsize,
}

impl Histogram {
    /// Create a new histogram with specified buckets
    pub fn new(bucket_boundaries: &[f64]) -> Self {
        let buckets = bucket_boundaries
            .iter()
            .map(|&boundary| (boundary, AtomicUsize::new(0)))
            .collect();

        Self {
            buckets,
            count: AtomicUsize::new(0),
            sum: AtomicUsize::new(0),
            min: AtomicUsize::new(usize::MAX),
            max: AtomicUsize::new(0),
        }
    }

    /// Create a histogram with exponential buckets
    pub fn exponential(start: f64, factor: f64, count: usize) -> Self {
        let boundaries: Vec<f64> = std::iter::successors(Some(start), |b| Some(b * factor))
            .take(count)
            .collect();

        Self::new(&boundaries)
    }

    /// Record a value in the histogram
    pub fn record(&self, value: f64) {
        let value_as_usize = value as usize;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_as_usize, Ordering::Relaxed);
        self.min.fetch_min(value_as_usize, Ordering::Relaxed);
        self.max.fetch_max(value_as_usize, Ordering::Relaxed);

        for (boundary, counter) in &self.buckets {
            if value <= *boundary {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get the count of values in the histogram
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the sum of values in the histogram
    pub fn sum(&self) -> usize {
        self.sum.load(Ordering::Relaxed)
    }

    /// Get the minimum value recorded
    pub fn min(&self) -> usize {
        self.min.load(Ordering::Relaxed)
    }

    /// Get the maximum value recorded
    pub fn max(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }

    /// Get the mean value
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }

        self.sum() as f64 / count as f64
    }

    /// Get the bucket counts
    pub fn buckets(&self) -> Vec<(f64, usize)> {
        self.buckets
            .iter()
            .map(|(boundary, counter)| (*boundary, counter.load(Ordering::Relaxed)))
            .collect()
    }
}

/// A timer for measuring durations, recorded in microseconds on drop
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    histogram: Arc<Histogram>,
}

impl Timer {
    /// Create a new timer
    pub fn new(histogram: Arc<Histogram>) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Get the elapsed time without stopping the timer
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.histogram.record(self.start.elapsed().as_micros() as f64);
    }
}

/// A registry for storing and accessing named metrics
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }

        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Value of a counter, zero if it was never touched
    pub fn counter_value(&self, name: &str) -> usize {
        self.counters.read().get(name).map_or(0, |c| c.value())
    }

    /// Get or create a histogram with exponential buckets
    pub fn exponential_histogram(
        &self,
        name: &str,
        start: f64,
        factor: f64,
        count: usize,
    ) -> Arc<Histogram> {
        if let Some(histogram) = self.histograms.read().get(name) {
            return histogram.clone();
        }

        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::exponential(start, factor, count)))
            .clone()
    }

    /// Create a timer for measuring operation duration
    pub fn timer(&self, name: &str) -> Timer {
        // Buckets from 1us to ~10s
        let histogram = self.exponential_histogram(name, 1.0, 2.0, 24);
        Timer::new(histogram)
    }

    /// Get metrics as a formatted string
    pub fn format(&self) -> String {
        let mut result = String::new();

        for (name, counter) in self.counters.read().iter() {
            result.push_str(&format!("{}: {}\n", name, counter.value()));
        }

        for (name, histogram) in self.histograms.read().iter() {
            result.push_str(&format!(
                "{}: count={}, sum={}, min={}, max={}, mean={:.2}\n",
                name,
                histogram.count(),
                histogram.sum(),
                histogram.min(),
                histogram.max(),
                histogram.mean()
            ));
        }

        result
    }
}

/// The metrics collector for the server
#[derive(Debug, Default)]
pub struct MetricsCollector {
    registry: MetricsRegistry,
    handling: Gauge,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the metrics registry
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// Record a connection event such as `accepted` or `failed`
    pub fn record_connection(&self, event_type: &str) {
        self.registry
            .counter(&format!("connections.{}", event_type))
            .increment(1);
    }

    /// Record a failed `accept()`
    pub fn record_accept_error(&self) {
        self.registry.counter("accept.errors").increment(1);
    }

    /// Record a response that was sent
    pub fn record_response(&self, status: Status, bytes: usize) {
        self.registry
            .counter(&format!("responses.{}", status.code()))
            .increment(1);
        self.registry.counter("bytes_sent").increment(bytes);
    }

    /// Number of responses sent with `status`
    pub fn responses(&self, status: Status) -> usize {
        self.registry
            .counter_value(&format!("responses.{}", status.code()))
    }

    /// Connections currently being handled by workers
    pub fn handling(&self) -> &Gauge {
        &self.handling
    }

    /// Time one connection from dequeue to close
    pub fn time_handling(&self) -> Timer {
        self.registry.timer("handling_time_us")
    }

    /// Get a formatted string of all metrics
    pub fn format(&self) -> String {
        let mut result = self.registry.format();
        result.push_str(&format!(
            "workers.handling: {} (peak {})\n",
            self.handling.value(),
            self.handling.peak()
        ));
        result
    }
}
