//! Metrics for the credential indices.
//!
//! Write paths (register, unregister, teardown) bump lock-free counters;
//! the read path is never instrumented so that lookups stay free of shared
//! cache-line contention beyond the index shards themselves.
//!
//! # Memory Ordering
//!
//! All atomic operations use `Ordering::Relaxed`. Each counter is independent
//! and monotonically increasing; a snapshot reads them one after the other and
//! may therefore be slightly skewed between counters, which is acceptable for
//! telemetry.
//!
//! # Percentile Tracking
//!
//! [`LatencyHistogram`] keeps a bounded window of recent samples (microseconds)
//! in a circular buffer behind a [`parking_lot::Mutex`]. Percentiles are
//! computed at snapshot time by sorting a copy of the window. It is meant for
//! paths that already perform I/O, such as subscription dispatch.
//!
//! # Usage
//!
//! ```
//! use gateway_common_cache::metrics::IndexMetrics;
//!
//! let metrics = IndexMetrics::new();
//! metrics.record_register();
//! metrics.record_rotation();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.registrations, 1);
//! assert_eq!(snapshot.rotations, 1);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tracing::info;

/// Default number of latency samples retained by a [`LatencyHistogram`].
pub const DEFAULT_HISTOGRAM_WINDOW_SIZE: usize = 1024;

// ── LatencyPercentiles ──────────────────────────────────────────────────

/// Latency percentiles, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    /// 50th percentile (median) latency in microseconds.
    pub p50: u64,
    /// 95th percentile latency in microseconds.
    pub p95: u64,
    /// 99th percentile latency in microseconds.
    pub p99: u64,
}

// ── LatencyHistogram ────────────────────────────────────────────────────

/// A bounded circular buffer of latency samples for streaming percentile computation.
///
/// Records the most recent `capacity` latency values. Older values are
/// overwritten once the buffer is full.
pub struct LatencyHistogram {
    inner: Mutex<HistogramInner>,
}

struct HistogramInner {
    buf: Vec<u64>,
    pos: usize,
    capacity: usize,
}

impl LatencyHistogram {
    /// Creates a new histogram with the given window size (at least one sample).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(HistogramInner {
                buf: Vec::with_capacity(capacity),
                pos: 0,
                capacity,
            }),
        }
    }

    /// Records a latency sample in microseconds.
    pub fn record(&self, value_us: u64) {
        let mut inner = self.inner.lock();
        let pos = inner.pos;
        if inner.buf.len() < inner.capacity {
            inner.buf.push(value_us);
        } else {
            inner.buf[pos] = value_us;
        }
        inner.pos = (pos + 1) % inner.capacity;
    }

    /// Computes p50, p95 and p99 over the current window.
    ///
    /// Returns all zeros when no samples have been recorded.
    #[must_use]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let mut sorted = {
            let inner = self.inner.lock();
            if inner.buf.is_empty() {
                return LatencyPercentiles::default();
            }
            inner.buf.clone()
        };
        sorted.sort_unstable();
        let len = sorted.len();
        LatencyPercentiles {
            p50: sorted[percentile_index(len, 50)],
            p95: sorted[percentile_index(len, 95)],
            p99: sorted[percentile_index(len, 99)],
        }
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    /// Returns `true` if no sample has been recorded since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all samples.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.buf.clear();
        inner.pos = 0;
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_WINDOW_SIZE)
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram").field("samples", &self.len()).finish()
    }
}

/// Nearest-rank index: `ceil(percentile/100 * len) - 1`, clamped to the valid range.
fn percentile_index(len: usize, percentile: u32) -> usize {
    if len == 0 {
        return 0;
    }
    let rank = (u64::from(percentile) * len as u64).div_ceil(100) as usize;
    rank.saturating_sub(1).min(len - 1)
}

// ── IndexMetrics ────────────────────────────────────────────────────────

/// Point-in-time view of an index's write-path counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct IndexMetricsSnapshot {
    /// Accepted/active records inserted or overwritten.
    #[builder(default)]
    pub registrations: u64,
    /// Records removed through an explicit unregister.
    #[builder(default)]
    pub unregistrations: u64,
    /// Records removed because they were re-registered with a non-accepted
    /// status (or as an inactive key).
    #[builder(default)]
    pub evictions: u64,
    /// Registrations that changed a credential of an existing record.
    #[builder(default)]
    pub rotations: u64,
    /// Secondary entries left untouched on removal because a newer record
    /// owns them.
    #[builder(default)]
    pub stale_removals_skipped: u64,
    /// Whole-API teardowns.
    #[builder(default)]
    pub api_teardowns: u64,
}

impl IndexMetricsSnapshot {
    /// Total number of write operations observed.
    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.registrations + self.unregistrations + self.evictions + self.api_teardowns
    }
}

#[derive(Default)]
struct IndexMetricsInner {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    evictions: AtomicU64,
    rotations: AtomicU64,
    stale_removals_skipped: AtomicU64,
    api_teardowns: AtomicU64,
}

/// Write-path counters for an index.
///
/// Cheap to clone; clones share the same counters.
#[derive(Clone, Default)]
pub struct IndexMetrics {
    inner: Arc<IndexMetricsInner>,
}

impl IndexMetrics {
    /// Creates a new set of zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a registration.
    pub fn record_register(&self) {
        self.inner.registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an explicit unregistration.
    pub fn record_unregister(&self) {
        self.inner.unregistrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a status-driven eviction.
    pub fn record_eviction(&self) {
        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a credential rotation.
    pub fn record_rotation(&self) {
        self.inner.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a secondary entry left in place because another id owns it.
    pub fn record_stale_removal_skipped(&self) {
        self.inner.stale_removals_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a whole-API teardown.
    pub fn record_api_teardown(&self) {
        self.inner.api_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> IndexMetricsSnapshot {
        IndexMetricsSnapshot::builder()
            .registrations(self.inner.registrations.load(Ordering::Relaxed))
            .unregistrations(self.inner.unregistrations.load(Ordering::Relaxed))
            .evictions(self.inner.evictions.load(Ordering::Relaxed))
            .rotations(self.inner.rotations.load(Ordering::Relaxed))
            .stale_removals_skipped(self.inner.stale_removals_skipped.load(Ordering::Relaxed))
            .api_teardowns(self.inner.api_teardowns.load(Ordering::Relaxed))
            .build()
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.inner.registrations.store(0, Ordering::Relaxed);
        self.inner.unregistrations.store(0, Ordering::Relaxed);
        self.inner.evictions.store(0, Ordering::Relaxed);
        self.inner.rotations.store(0, Ordering::Relaxed);
        self.inner.stale_removals_skipped.store(0, Ordering::Relaxed);
        self.inner.api_teardowns.store(0, Ordering::Relaxed);
    }

    /// Logs the current counters at info level under the given index name.
    pub fn log_metrics(&self, index: &'static str) {
        let s = self.snapshot();
        info!(
            index,
            registrations = s.registrations,
            unregistrations = s.unregistrations,
            evictions = s.evictions,
            rotations = s.rotations,
            stale_removals_skipped = s.stale_removals_skipped,
            api_teardowns = s.api_teardowns,
            "Index metrics"
        );
    }
}

impl std::fmt::Debug for IndexMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexMetrics").field("snapshot", &self.snapshot()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_index_nearest_rank() {
        assert_eq!(percentile_index(0, 50), 0);
        assert_eq!(percentile_index(1, 99), 0);
        assert_eq!(percentile_index(100, 50), 49);
        assert_eq!(percentile_index(100, 95), 94);
        assert_eq!(percentile_index(100, 99), 98);
        assert_eq!(percentile_index(10, 99), 9);
    }

    #[test]
    fn test_histogram_empty_returns_zeros() {
        let h = LatencyHistogram::new(8);
        assert!(h.is_empty());
        assert_eq!(h.percentiles(), LatencyPercentiles::default());
    }

    #[test]
    fn test_histogram_window_overwrites_oldest() {
        let h = LatencyHistogram::new(4);
        for v in [1000, 1000, 1000, 1000, 1, 2, 3, 4] {
            h.record(v);
        }
        assert_eq!(h.len(), 4);
        let p = h.percentiles();
        assert_eq!(p.p50, 2);
        assert_eq!(p.p99, 4);
    }

    #[test]
    fn test_histogram_zero_capacity_is_clamped() {
        let h = LatencyHistogram::new(0);
        h.record(5);
        h.record(7);
        assert_eq!(h.len(), 1);
        assert_eq!(h.percentiles().p50, 7);
    }

    #[test]
    fn test_index_metrics_snapshot_and_reset() {
        let m = IndexMetrics::new();
        let shared = m.clone();
        m.record_register();
        m.record_register();
        shared.record_unregister();
        m.record_eviction();
        m.record_stale_removal_skipped();
        m.record_api_teardown();

        let s = m.snapshot();
        assert_eq!(s.registrations, 2);
        assert_eq!(s.unregistrations, 1);
        assert_eq!(s.evictions, 1);
        assert_eq!(s.stale_removals_skipped, 1);
        assert_eq!(s.total_writes(), 5);

        m.reset();
        assert_eq!(shared.snapshot(), IndexMetricsSnapshot::default());
    }
}
