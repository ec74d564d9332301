use std::time::{Duration, Instant};

use opentelemetry::metrics::Histogram;

pub trait TimerUpdate {
    fn add(&self, duration: Duration);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration) {
        self.record(duration.as_secs_f64(), &[]);
    }
}

/// Records the elapsed time into the metric when dropped.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self {
            start: Instant::now(),
            metric,
        }
    }
}

impl<T: TimerUpdate + Sync> Drop for Timer<'_, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed());
    }
}

/// Per-backend operation latencies.
#[derive(Debug)]
pub struct StoreMetrics {
    pub reads: Histogram<f64>,
    pub writes: Histogram<f64>,
    pub deletes: Histogram<f64>,
    pub lists: Histogram<f64>,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreMetrics {
    pub fn new() -> StoreMetrics {
        let meter = opentelemetry::global::meter("tuple-store");

        let reads = meter
            .f64_histogram("tuple_store.reads")
            .with_description("Store read latencies in seconds")
            .build();

        let writes = meter
            .f64_histogram("tuple_store.writes")
            .with_description("Store write latencies in seconds")
            .build();

        let deletes = meter
            .f64_histogram("tuple_store.deletes")
            .with_description("Store delete latencies in seconds")
            .build();

        let lists = meter
            .f64_histogram("tuple_store.lists")
            .with_description("Store listing latencies in seconds")
            .build();

        StoreMetrics {
            reads,
            writes,
            deletes,
            lists,
        }
    }
}
