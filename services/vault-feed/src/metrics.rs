//! Observability and metrics for the vault feed
//!
//! Counts every branch a tick can take (stale, failed, misaligned,
//! unchanged, published, deferred) plus re-subscriptions and flushes, and
//! tracks decode latency for percentile reporting.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core metrics for the feed engine.
pub struct FeedMetrics {
    // Ticks
    pub ticks_received: AtomicU64,
    pub ticks_processed: AtomicU64,
    pub ticks_stale: AtomicU64,
    pub ticks_coalesced: AtomicU64,
    pub ticks_failed: AtomicU64,
    pub ticks_misaligned: AtomicU64,
    pub ticks_unchanged: AtomicU64,
    pub decode_latency_ns: Mutex<LatencyTracker>,

    // Publication
    pub publishes: AtomicU64,
    pub deferred_publishes: AtomicU64,
    pub flushes: AtomicU64,
    pub records_dropped: AtomicU64,

    // Subscriptions
    pub resubscriptions: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            ticks_received: AtomicU64::new(0),
            ticks_processed: AtomicU64::new(0),
            ticks_stale: AtomicU64::new(0),
            ticks_coalesced: AtomicU64::new(0),
            ticks_failed: AtomicU64::new(0),
            ticks_misaligned: AtomicU64::new(0),
            ticks_unchanged: AtomicU64::new(0),
            decode_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            publishes: AtomicU64::new(0),
            deferred_publishes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            resubscriptions: AtomicU64::new(0),
        }
    }

    pub fn record_tick_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decoded tick and how long decoding took.
    pub fn record_tick_processed(&self, decode_ns: u64, dropped_records: u64) {
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
        self.records_dropped.fetch_add(dropped_records, Ordering::Relaxed);
        if let Ok(mut tracker) = self.decode_latency_ns.lock() {
            tracker.record(decode_ns);
        }
    }

    pub fn record_stale(&self) {
        self.ticks_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Record ticks superseded by a newer tick before processing.
    pub fn record_coalesced(&self, count: u64) {
        self.ticks_coalesced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.ticks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_misaligned(&self) {
        self.ticks_misaligned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.ticks_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred_publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resubscription(&self) {
        self.resubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let failed = self.ticks_failed.load(Ordering::Relaxed);
        if failed > thresholds.max_failed_ticks {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "ticks_failed".to_string(),
                message: format!("Failed ticks: {} > threshold {}", failed, thresholds.max_failed_ticks),
            });
        }

        let misaligned = self.ticks_misaligned.load(Ordering::Relaxed);
        if misaligned > thresholds.max_misaligned_ticks {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "ticks_misaligned".to_string(),
                message: format!(
                    "Misaligned ticks: {} > threshold {}",
                    misaligned, thresholds.max_misaligned_ticks
                ),
            });
        }

        if let Ok(tracker) = self.decode_latency_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_decode_p99_ns {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "decode_p99".to_string(),
                        message: format!(
                            "Decode p99: {}ns > threshold {}ns",
                            p99, thresholds.max_decode_p99_ns
                        ),
                    });
                }
            }
        }

        alerts
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("ticks_received".to_string(), self.ticks_received.load(Ordering::Relaxed));
        m.insert("ticks_processed".to_string(), self.ticks_processed.load(Ordering::Relaxed));
        m.insert("ticks_stale".to_string(), self.ticks_stale.load(Ordering::Relaxed));
        m.insert("ticks_coalesced".to_string(), self.ticks_coalesced.load(Ordering::Relaxed));
        m.insert("ticks_failed".to_string(), self.ticks_failed.load(Ordering::Relaxed));
        m.insert("ticks_misaligned".to_string(), self.ticks_misaligned.load(Ordering::Relaxed));
        m.insert("ticks_unchanged".to_string(), self.ticks_unchanged.load(Ordering::Relaxed));
        m.insert("publishes".to_string(), self.publishes.load(Ordering::Relaxed));
        m.insert("deferred_publishes".to_string(), self.deferred_publishes.load(Ordering::Relaxed));
        m.insert("flushes".to_string(), self.flushes.load(Ordering::Relaxed));
        m.insert("records_dropped".to_string(), self.records_dropped.load(Ordering::Relaxed));
        m.insert("resubscriptions".to_string(), self.resubscriptions.load(Ordering::Relaxed));
        m
    }

    /// Point-in-time snapshot for logging or an admin endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = match self.decode_latency_ns.lock() {
            Ok(tracker) => DecodeLatency {
                samples: tracker.len(),
                mean_ns: tracker.mean(),
                p50_ns: tracker.percentile(50),
                p99_ns: tracker.percentile(99),
                max_ns: tracker.percentile(100),
            },
            Err(_) => DecodeLatency::default(),
        };

        MetricsSnapshot {
            captured_at: Utc::now(),
            counters: self.export(),
            decode: latency,
        }
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of [`FeedMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub counters: BTreeMap<String, u64>,
    pub decode: DecodeLatency,
}

/// Decode latency summary over the sample window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeLatency {
    pub samples: usize,
    pub mean_ns: Option<u64>,
    pub p50_ns: Option<u64>,
    pub p99_ns: Option<u64>,
    pub max_ns: Option<u64>,
}

/// Sliding window of decode latencies in nanoseconds.
pub struct LatencyTracker {
    window: VecDeque<u64>,
    limit: usize,
}

impl LatencyTracker {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            window: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn record(&mut self, nanos: u64) {
        if self.window.len() == self.limit {
            self.window.pop_front();
        }
        self.window.push_back(nanos);
    }

    /// Nearest-rank percentile, `p` in 0..=100.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        let mut sorted: Vec<u64> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let last = sorted.len().checked_sub(1)?;
        let rank = (p.min(100) * last) / 100;
        sorted.get(rank).copied()
    }

    pub fn mean(&self) -> Option<u64> {
        let n = self.window.len() as u64;
        (n > 0).then(|| self.window.iter().sum::<u64>() / n)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Configurable alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_failed_ticks: u64,
    /// Any misaligned tick points at a transport bug, so the default is 0.
    pub max_misaligned_ticks: u64,
    pub max_decode_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_failed_ticks: 10,
            max_misaligned_ticks: 0,
            max_decode_p99_ns: 1_000_000, // 1ms
        }
    }
}
