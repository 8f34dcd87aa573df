//! Process-wide metrics registry.
//!
//! Actors register named timers and counters under their own identity so two
//! instances running the same operation never share a series. Registration
//! takes the registry lock; counters record with atomics and each timer
//! holds its own latency histogram behind a short per-timer lock.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Identity of one actor instance: actor name plus instance number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub actor: String,
    pub instance: usize,
}

impl ActorIdentity {
    pub fn new(actor: impl Into<String>, instance: usize) -> Self {
        Self {
            actor: actor.into(),
            instance,
        }
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.actor, self.instance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MetricKey {
    actor: ActorIdentity,
    name: String,
}

/// Monotonic counter handle.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn incr(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Significant figures kept by every latency histogram.
const HISTOGRAM_SIGFIGS: u8 = 3;

fn new_histogram() -> Histogram<u64> {
    let mut histogram =
        Histogram::<u64>::new(HISTOGRAM_SIGFIGS).expect("3 sigfigs is always valid");
    histogram.auto(true);
    histogram
}

#[derive(Debug)]
struct TimerStats {
    histogram: Mutex<Histogram<u64>>,
    failures: AtomicU64,
    total_micros: AtomicU64,
}

impl Default for TimerStats {
    fn default() -> Self {
        Self {
            histogram: Mutex::new(new_histogram()),
            failures: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
        }
    }
}

/// Latency timer handle backed by an HdrHistogram in microseconds. Every
/// attempt is one sample; failed attempts are also tallied separately.
#[derive(Debug, Clone, Default)]
pub struct Timer(Arc<TimerStats>);

impl Timer {
    fn histogram(&self) -> MutexGuard<'_, Histogram<u64>> {
        self.0.histogram.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, elapsed: Duration, success: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if !success {
            self.0.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.0.total_micros.fetch_add(micros, Ordering::Relaxed);
        // Auto-resize only fails past the trackable range (about u64::MAX / 2)
        let _ = self.histogram().record(micros);
    }

    pub fn count(&self) -> u64 {
        self.histogram().len()
    }

    pub fn failures(&self) -> u64 {
        self.0.failures.load(Ordering::Relaxed)
    }

    /// Latency at `quantile` (0.0..=1.0) in microseconds, 0 when empty.
    pub fn percentile_micros(&self, quantile: f64) -> u64 {
        self.histogram().value_at_quantile(quantile)
    }

    fn summary(&self, key: &MetricKey) -> TimerSummary {
        let histogram = self.histogram();
        let count = histogram.len();
        let empty = count == 0;
        TimerSummary {
            actor: key.actor.to_string(),
            name: key.name.clone(),
            count,
            failures: self.failures(),
            total_micros: self.0.total_micros.load(Ordering::Relaxed),
            min_micros: if empty { 0 } else { histogram.min() },
            max_micros: if empty { 0 } else { histogram.max() },
            mean_micros: if empty { 0.0 } else { histogram.mean() },
            p50_micros: histogram.value_at_quantile(0.50),
            p95_micros: histogram.value_at_quantile(0.95),
            p99_micros: histogram.value_at_quantile(0.99),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    timers: BTreeMap<MetricKey, Timer>,
    counters: BTreeMap<MetricKey, Counter>,
}

/// Shared registry; clones refer to the same metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Metrics stay readable even if an actor panicked mid-registration
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create a counter.
    pub fn counter(&self, actor: &ActorIdentity, name: &str) -> Counter {
        let key = MetricKey {
            actor: actor.clone(),
            name: name.to_string(),
        };
        self.lock().counters.entry(key).or_default().clone()
    }

    /// Get or create a timer.
    pub fn timer(&self, actor: &ActorIdentity, name: &str) -> Timer {
        let key = MetricKey {
            actor: actor.clone(),
            name: name.to_string(),
        };
        self.lock().timers.entry(key).or_default().clone()
    }

    /// Current value of a counter, if registered.
    pub fn counter_value(&self, actor: &ActorIdentity, name: &str) -> Option<u64> {
        let key = MetricKey {
            actor: actor.clone(),
            name: name.to_string(),
        };
        self.lock().counters.get(&key).map(Counter::get)
    }

    /// Sum of a counter across every actor instance.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.lock()
            .counters
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, c)| c.get())
            .sum()
    }

    /// Failed attempts recorded by every timer.
    pub fn total_failures(&self) -> u64 {
        self.lock().timers.values().map(Timer::failures).sum()
    }

    /// Point-in-time copy of every metric.
    pub fn snapshot(&self) -> MetricsReport {
        let inner = self.lock();
        MetricsReport {
            generated_at: Utc::now(),
            timers: inner.timers.iter().map(|(k, t)| t.summary(k)).collect(),
            counters: inner
                .counters
                .iter()
                .map(|(k, c)| CounterSummary {
                    actor: k.actor.to_string(),
                    name: k.name.clone(),
                    value: c.get(),
                })
                .collect(),
        }
    }
}

/// Serialized timer series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSummary {
    pub actor: String,
    pub name: String,
    pub count: u64,
    pub failures: u64,
    pub total_micros: u64,
    pub min_micros: u64,
    pub max_micros: u64,
    pub mean_micros: f64,
    pub p50_micros: u64,
    pub p95_micros: u64,
    pub p99_micros: u64,
}

/// Serialized counter series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSummary {
    pub actor: String,
    pub name: String,
    pub value: u64,
}

/// Snapshot handed to the reporting side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub generated_at: DateTime<Utc>,
    pub timers: Vec<TimerSummary>,
    pub counters: Vec<CounterSummary>,
}

impl MetricsReport {
    pub fn total_failures(&self) -> u64 {
        self.timers.iter().map(|t| t.failures).sum()
    }

    pub fn total_operations(&self) -> u64 {
        self.timers.iter().map(|t| t.count).sum()
    }
}
