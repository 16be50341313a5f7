//! Router Metrics
//!
//! Smoothed per-backend estimates consumed by the routing policy, plus
//! global counters and averages for observability:
//! - Per-slot latency, success rate and queue size
//! - Request, cache hit, failover and stale-serve counters
//! - End-to-end latency histogram
//!
//! # Smoothing
//!
//! ```text
//! success: latency = (latency + sample) / 2
//!          rate    = (rate + 1) / 2
//! failure: rate    = rate * 0.9
//! ```
//!
//! Failures leave the latency estimate untouched.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::policy::BackendSlot;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds in milliseconds
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket boundaries
    ///
    /// Values above the last boundary land in the last bucket.
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Default request latency buckets (ms)
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
        ])
    }

    /// Record a value
    pub fn record(&self, value_ms: u64) {
        #[allow(clippy::cast_precision_loss)]
        let value = value_ms as f64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or_else(|| self.buckets.len().saturating_sub(1));

        if let Some(count) = self.counts.get(bucket_idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.max.fetch_max(value_ms, Ordering::Relaxed);
    }

    /// Point-in-time copy of the distribution
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts: self
                .counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            total: self.total_count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub buckets: Vec<f64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Number of samples
    pub total: u64,
    /// Sum of samples
    pub sum: u64,
    /// Largest sample
    pub max: u64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket containing the `p` quantile
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (bound, &count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count;
            if cumulative >= target {
                return *bound;
            }
        }

        self.buckets.last().copied().unwrap_or(0.0)
    }

    /// Median
    #[must_use]
    pub fn p50(&self) -> f64 {
        self.percentile(0.5)
    }

    /// 99th percentile
    #[must_use]
    pub fn p99(&self) -> f64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Counter / Gauge
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Overwrite the value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Route Metrics
// ============================================================================

/// Smoothed health estimate for one backend
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteMetrics {
    /// Smoothed latency in milliseconds
    pub average_latency_ms: f64,
    /// Smoothed success rate in `[0, 1]`
    pub success_rate: f64,
    /// Requests currently in flight on the backend
    pub queue_size: usize,
}

impl RouteMetrics {
    /// Multiplicative decay applied to the success rate on failure
    pub const FAILURE_DECAY: f64 = 0.9;

    /// Fold in a successful call
    #[allow(clippy::cast_precision_loss)]
    pub fn record_success(&mut self, latency_ms: u64) {
        self.average_latency_ms = (self.average_latency_ms + latency_ms as f64) / 2.0;
        self.success_rate = (self.success_rate + 1.0) / 2.0;
    }

    /// Fold in a failed call
    pub fn record_failure(&mut self) {
        self.success_rate *= Self::FAILURE_DECAY;
    }
}

impl Default for RouteMetrics {
    /// An untried backend is assumed fast and reliable
    fn default() -> Self {
        Self {
            average_latency_ms: 0.0,
            success_rate: 1.0,
            queue_size: 0,
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Global smoothed estimates across all requests
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GlobalAverages {
    /// Smoothed end-to-end latency (ms)
    pub average_latency_ms: f64,
    /// Smoothed fraction of requests that produced data
    pub success_rate: f64,
    /// Smoothed fraction of requests served from a fresh cache row
    pub cache_hit_rate: f64,
}

/// How one request ended, as seen by the aggregator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Served from a fresh cache row
    FreshCache,
    /// Served by a backend
    Backend,
    /// Served from an expired cache row after both backends failed
    StaleCache,
    /// No data was produced
    Failed,
}

/// Metrics for one backend slot in a snapshot
#[derive(Clone, Debug, Serialize)]
pub struct BackendSnapshot {
    /// Slot
    pub slot: BackendSlot,
    /// Adapter name
    pub name: String,
    /// Smoothed routing metrics
    pub metrics: RouteMetrics,
    /// Calls sent to this backend
    pub attempts: u64,
    /// Calls that failed
    pub failures: u64,
}

/// Point-in-time view of everything the aggregator tracks
#[derive(Clone, Debug, Serialize)]
pub struct AggregateMetricsSnapshot {
    /// Seconds since the aggregator was created
    pub uptime_seconds: u64,
    /// Requests processed
    pub total_requests: u64,
    /// Requests served from a fresh cache row
    pub cache_hits: u64,
    /// Requests that moved to the alternate backend
    pub failovers: u64,
    /// Requests answered from an expired cache row
    pub stale_serves: u64,
    /// Requests that produced no data
    pub failures: u64,
    /// Submissions waiting in the background queue
    pub queue_depth: u64,
    /// Smoothed global estimates
    pub averages: GlobalAverages,
    /// Median request latency bucket (ms)
    pub latency_p50_ms: f64,
    /// 99th percentile request latency bucket (ms)
    pub latency_p99_ms: f64,
    /// Per-backend view, primary first
    pub backends: Vec<BackendSnapshot>,
}

#[derive(Debug, Default)]
struct SlotCounters {
    attempts: Counter,
    failures: Counter,
}

/// Owner of every metric the router reads or exports
///
/// Only the aggregator mutates [`RouteMetrics`]; the router reads copies.
#[derive(Debug)]
pub struct MetricsAggregator {
    names: [String; 2],
    routes: RwLock<[RouteMetrics; 2]>,
    slot_counters: [SlotCounters; 2],
    averages: Mutex<GlobalAverages>,

    total_requests: Counter,
    cache_hits: Counter,
    failovers: Counter,
    stale_serves: Counter,
    failures: Counter,
    queue_depth: Gauge,
    latency: Histogram,

    started_at: Instant,
}

impl MetricsAggregator {
    /// Create an aggregator for two named backends
    pub fn new(primary_name: impl Into<String>, secondary_name: impl Into<String>) -> Self {
        Self {
            names: [primary_name.into(), secondary_name.into()],
            routes: RwLock::new([RouteMetrics::default(); 2]),
            slot_counters: Default::default(),
            averages: Mutex::new(GlobalAverages::default()),
            total_requests: Counter::default(),
            cache_hits: Counter::default(),
            failovers: Counter::default(),
            stale_serves: Counter::default(),
            failures: Counter::default(),
            queue_depth: Gauge::default(),
            latency: Histogram::latency_default(),
            started_at: Instant::now(),
        }
    }

    /// Replace a slot's estimate, e.g. with the adapter's own view at startup
    pub fn seed(&self, slot: BackendSlot, metrics: RouteMetrics) {
        self.routes.write()[slot.index()] = metrics;
    }

    /// Copy of a slot's estimate
    #[must_use]
    pub fn route(&self, slot: BackendSlot) -> RouteMetrics {
        self.routes.read()[slot.index()]
    }

    /// Overwrite a slot's queue size with the adapter's live value
    pub fn refresh_queue_size(&self, slot: BackendSlot, queue_size: usize) {
        self.routes.write()[slot.index()].queue_size = queue_size;
    }

    /// Record a successful backend call
    pub fn record_attempt_success(&self, slot: BackendSlot, latency_ms: u64) {
        self.slot_counters[slot.index()].attempts.inc();
        self.routes.write()[slot.index()].record_success(latency_ms);
    }

    /// Record a failed backend call
    pub fn record_attempt_failure(&self, slot: BackendSlot) {
        let counters = &self.slot_counters[slot.index()];
        counters.attempts.inc();
        counters.failures.inc();
        self.routes.write()[slot.index()].record_failure();
    }

    /// Record a hop to the alternate backend
    pub fn record_failover(&self) {
        self.failovers.inc();
    }

    /// Update the background queue depth
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as u64);
    }

    /// Record the end of a request
    #[allow(clippy::cast_precision_loss)]
    pub fn record_outcome(&self, outcome: RequestOutcome, latency_ms: u64) {
        self.total_requests.inc();
        self.latency.record(latency_ms);

        match outcome {
            RequestOutcome::FreshCache => self.cache_hits.inc(),
            RequestOutcome::StaleCache => self.stale_serves.inc(),
            RequestOutcome::Failed => self.failures.inc(),
            RequestOutcome::Backend => {}
        }

        let mut averages = self.averages.lock();
        averages.average_latency_ms = (averages.average_latency_ms + latency_ms as f64) / 2.0;
        averages.success_rate = if outcome == RequestOutcome::Failed {
            averages.success_rate * RouteMetrics::FAILURE_DECAY
        } else {
            (averages.success_rate + 1.0) / 2.0
        };
        if outcome == RequestOutcome::FreshCache {
            averages.cache_hit_rate = (averages.cache_hit_rate + 1.0) / 2.0;
        }
    }

    /// Time since the aggregator was created
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of all metrics
    #[must_use]
    pub fn snapshot(&self) -> AggregateMetricsSnapshot {
        let routes = *self.routes.read();
        let latency = self.latency.snapshot();

        let backends = BackendSlot::ALL
            .into_iter()
            .map(|slot| {
                let counters = &self.slot_counters[slot.index()];
                BackendSnapshot {
                    slot,
                    name: self.names[slot.index()].clone(),
                    metrics: routes[slot.index()],
                    attempts: counters.attempts.get(),
                    failures: counters.failures.get(),
                }
            })
            .collect();

        AggregateMetricsSnapshot {
            uptime_seconds: self.uptime().as_secs(),
            total_requests: self.total_requests.get(),
            cache_hits: self.cache_hits.get(),
            failovers: self.failovers.get(),
            stale_serves: self.stale_serves.get(),
            failures: self.failures.get(),
            queue_depth: self.queue_depth.get(),
            averages: *self.averages.lock(),
            latency_p50_ms: latency.p50(),
            latency_p99_ms: latency.p99(),
            backends,
        }
    }

    /// Export as Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        for (name, help, kind, value) in [
            (
                "orchestrator_requests_total",
                "Requests processed",
                "counter",
                snapshot.total_requests,
            ),
            (
                "orchestrator_cache_hits_total",
                "Requests served from fresh cache",
                "counter",
                snapshot.cache_hits,
            ),
            (
                "orchestrator_failovers_total",
                "Requests moved to the alternate backend",
                "counter",
                snapshot.failovers,
            ),
            (
                "orchestrator_stale_serves_total",
                "Requests answered from expired cache",
                "counter",
                snapshot.stale_serves,
            ),
            (
                "orchestrator_failures_total",
                "Requests that produced no data",
                "counter",
                snapshot.failures,
            ),
            (
                "orchestrator_queue_depth",
                "Background submissions waiting",
                "gauge",
                snapshot.queue_depth,
            ),
        ] {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
            );
        }

        let _ = write!(
            output,
            "# HELP orchestrator_latency_ms Request latency percentiles\n\
             # TYPE orchestrator_latency_ms gauge\n\
             orchestrator_latency_ms{{quantile=\"0.5\"}} {}\n\
             orchestrator_latency_ms{{quantile=\"0.99\"}} {}\n\n",
            snapshot.latency_p50_ms, snapshot.latency_p99_ms
        );

        let _ = write!(
            output,
            "# HELP orchestrator_cache_hit_rate Smoothed cache hit rate\n\
             # TYPE orchestrator_cache_hit_rate gauge\n\
             orchestrator_cache_hit_rate {}\n\n",
            snapshot.averages.cache_hit_rate
        );

        // Per-backend metrics
        for backend in &snapshot.backends {
            let labels = format!("slot=\"{}\",backend=\"{}\"", backend.slot, backend.name);
            let _ = writeln!(output, "backend_attempts_total{{{labels}}} {}", backend.attempts);
            let _ = writeln!(output, "backend_failures_total{{{labels}}} {}", backend.failures);
            let _ = writeln!(
                output,
                "backend_latency_ms{{{labels}}} {}",
                backend.metrics.average_latency_ms
            );
            let _ = writeln!(
                output,
                "backend_success_rate{{{labels}}} {}",
                backend.metrics.success_rate
            );
            let _ = writeln!(
                output,
                "backend_queue_size{{{labels}}} {}\n",
                backend.metrics.queue_size
            );
        }

        output
    }
}
