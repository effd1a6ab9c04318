//! Resolution and dispatch counters.
//!
//! [`ResolutionMetrics`] sits on the request path and is therefore nothing but
//! relaxed atomic increments. [`DispatchMetrics`] additionally keeps a
//! [`LatencyHistogram`] of dispatch durations; dispatch already awaits the API
//! runtime, so the histogram's mutex is not on any hot path.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use gateway_common_cache::{LatencyHistogram, LatencyPercentiles};
use tracing::info;

use crate::token::TokenKind;

// ── ResolutionMetrics ───────────────────────────────────────────────────

/// Hits and misses for one token kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    /// Resolutions that found a subscription.
    pub hits: u64,
    /// Resolutions that found nothing.
    pub misses: u64,
}

/// Point-in-time view of [`ResolutionMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct ResolutionMetricsSnapshot {
    /// Plain API key resolutions.
    #[builder(default)]
    pub api_key: KindCounts,
    /// MD5 API key resolutions.
    #[builder(default)]
    pub md5_api_key: KindCounts,
    /// Client id resolutions.
    #[builder(default)]
    pub client_id: KindCounts,
    /// Client certificate resolutions.
    #[builder(default)]
    pub client_certificate: KindCounts,
    /// Tokens of an unknown kind.
    #[builder(default)]
    pub unknown: u64,
}

impl ResolutionMetricsSnapshot {
    /// Total hits across all kinds.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.api_key.hits
            + self.md5_api_key.hits
            + self.client_id.hits
            + self.client_certificate.hits
    }

    /// Total misses across all kinds, unknown tokens included.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.api_key.misses
            + self.md5_api_key.misses
            + self.client_id.misses
            + self.client_certificate.misses
            + self.unknown
    }
}

#[derive(Default)]
struct Counter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counter {
    fn load(&self) -> KindCounts {
        KindCounts {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct ResolutionMetricsInner {
    api_key: Counter,
    md5_api_key: Counter,
    client_id: Counter,
    client_certificate: Counter,
    unknown: AtomicU64,
}

/// Per-kind resolution outcome counters.
///
/// Cheap to clone; clones share the same counters.
#[derive(Clone, Default)]
pub struct ResolutionMetrics {
    inner: Arc<ResolutionMetricsInner>,
}

impl ResolutionMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of resolving a token of `kind`.
    pub fn record(&self, kind: TokenKind, hit: bool) {
        let counter = match kind {
            TokenKind::ApiKey => &self.inner.api_key,
            TokenKind::Md5ApiKey => &self.inner.md5_api_key,
            TokenKind::ClientId => &self.inner.client_id,
            TokenKind::ClientCertificate => &self.inner.client_certificate,
            TokenKind::Unknown => {
                self.inner.unknown.fetch_add(1, Ordering::Relaxed);
                return;
            },
        };
        if hit {
            counter.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            counter.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> ResolutionMetricsSnapshot {
        ResolutionMetricsSnapshot::builder()
            .api_key(self.inner.api_key.load())
            .md5_api_key(self.inner.md5_api_key.load())
            .client_id(self.inner.client_id.load())
            .client_certificate(self.inner.client_certificate.load())
            .unknown(self.inner.unknown.load(Ordering::Relaxed))
            .build()
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.inner.api_key.reset();
        self.inner.md5_api_key.reset();
        self.inner.client_id.reset();
        self.inner.client_certificate.reset();
        self.inner.unknown.store(0, Ordering::Relaxed);
    }

    /// Logs the current counters at info level.
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            api_key_hits = s.api_key.hits,
            api_key_misses = s.api_key.misses,
            md5_api_key_hits = s.md5_api_key.hits,
            md5_api_key_misses = s.md5_api_key.misses,
            client_id_hits = s.client_id.hits,
            client_id_misses = s.client_id.misses,
            client_certificate_hits = s.client_certificate.hits,
            client_certificate_misses = s.client_certificate.misses,
            unknown = s.unknown,
            "Resolution metrics"
        );
    }
}

impl std::fmt::Debug for ResolutionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionMetrics").field("snapshot", &self.snapshot()).finish()
    }
}

// ── DispatchMetrics ─────────────────────────────────────────────────────

/// Point-in-time view of [`DispatchMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct DispatchMetricsSnapshot {
    /// Dispatches started.
    #[builder(default)]
    pub dispatched: u64,
    /// Dispatches that completed successfully.
    #[builder(default)]
    pub succeeded: u64,
    /// Dispatches that returned an error.
    #[builder(default)]
    pub failed: u64,
    /// Dispatches cut off by the timeout.
    #[builder(default)]
    pub timed_out: u64,
    /// Failure commands persisted.
    #[builder(default)]
    pub commands_recorded: u64,
    /// Failure commands that could not be persisted.
    #[builder(default)]
    pub command_failures: u64,
    /// Dispatch latency percentiles, in microseconds.
    #[builder(default)]
    pub latency: LatencyPercentiles,
}

impl DispatchMetricsSnapshot {
    /// Dispatches that ended without success.
    #[must_use]
    pub fn unsuccessful(&self) -> u64 {
        self.failed + self.timed_out
    }
}

#[derive(Default)]
struct DispatchMetricsInner {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    commands_recorded: AtomicU64,
    command_failures: AtomicU64,
    latency: LatencyHistogram,
}

/// Dispatch outcome counters and latency.
///
/// Cheap to clone; clones share the same counters.
#[derive(Clone, Default)]
pub struct DispatchMetrics {
    inner: Arc<DispatchMetricsInner>,
}

impl DispatchMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a dispatch.
    pub fn record_dispatched(&self) {
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful dispatch and its duration.
    pub fn record_success(&self, elapsed: Duration) {
        self.inner.succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    /// Records a failed dispatch and its duration.
    pub fn record_failure(&self, elapsed: Duration) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    /// Records a timed-out dispatch.
    pub fn record_timeout(&self, elapsed: Duration) {
        self.inner.timed_out.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    /// Records a persisted failure command.
    pub fn record_command(&self) {
        self.inner.commands_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failure command that could not be persisted.
    pub fn record_command_failure(&self) {
        self.inner.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.inner.latency.record(micros);
    }

    /// Takes a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot::builder()
            .dispatched(self.inner.dispatched.load(Ordering::Relaxed))
            .succeeded(self.inner.succeeded.load(Ordering::Relaxed))
            .failed(self.inner.failed.load(Ordering::Relaxed))
            .timed_out(self.inner.timed_out.load(Ordering::Relaxed))
            .commands_recorded(self.inner.commands_recorded.load(Ordering::Relaxed))
            .command_failures(self.inner.command_failures.load(Ordering::Relaxed))
            .latency(self.inner.latency.percentiles())
            .build()
    }

    /// Resets every counter and the latency window.
    pub fn reset(&self) {
        self.inner.dispatched.store(0, Ordering::Relaxed);
        self.inner.succeeded.store(0, Ordering::Relaxed);
        self.inner.failed.store(0, Ordering::Relaxed);
        self.inner.timed_out.store(0, Ordering::Relaxed);
        self.inner.commands_recorded.store(0, Ordering::Relaxed);
        self.inner.command_failures.store(0, Ordering::Relaxed);
        self.inner.latency.reset();
    }

    /// Logs the current counters at info level.
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            dispatched = s.dispatched,
            succeeded = s.succeeded,
            failed = s.failed,
            timed_out = s.timed_out,
            commands_recorded = s.commands_recorded,
            command_failures = s.command_failures,
            latency_p50_us = s.latency.p50,
            latency_p95_us = s.latency.p95,
            latency_p99_us = s.latency.p99,
            "Dispatch metrics"
        );
    }
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics").field("snapshot", &self.snapshot()).finish()
    }
}
