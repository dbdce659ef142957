use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every branch and stage of one pipeline run.
pub struct Metrics {
    // Counters
    branches_total: AtomicUsize,
    branches_lost: AtomicUsize,
    parse_failures: AtomicUsize,
    extraction_failures: AtomicUsize,
    fragments_total: AtomicUsize,
    items_extracted: AtomicUsize,
    reconciler_fallbacks: AtomicUsize,
    refinement_fail_open: AtomicUsize,
    summary_errors: AtomicUsize,

    // Timing (in microseconds)
    fan_out_time_us: AtomicU64,
    consolidate_time_us: AtomicU64,
    refine_time_us: AtomicU64,
    synthesize_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            branches_total: AtomicUsize::new(0),
            branches_lost: AtomicUsize::new(0),
            parse_failures: AtomicUsize::new(0),
            extraction_failures: AtomicUsize::new(0),
            fragments_total: AtomicUsize::new(0),
            items_extracted: AtomicUsize::new(0),
            reconciler_fallbacks: AtomicUsize::new(0),
            refinement_fail_open: AtomicUsize::new(0),
            summary_errors: AtomicUsize::new(0),
            fan_out_time_us: AtomicU64::new(0),
            consolidate_time_us: AtomicU64::new(0),
            refine_time_us: AtomicU64::new(0),
            synthesize_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_branch(&self, fragments: usize, items: usize) {
        self.branches_total.fetch_add(1, Ordering::Relaxed);
        self.fragments_total.fetch_add(fragments, Ordering::Relaxed);
        self.items_extracted.fetch_add(items, Ordering::Relaxed);
    }

    /// A branch that panicked or was cancelled before returning
    pub fn record_lost_branch(&self) {
        self.branches_total.fetch_add(1, Ordering::Relaxed);
        self.branches_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciler_fallback(&self) {
        self.reconciler_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refinement_fail_open(&self) {
        self.refinement_fail_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_summary_error(&self) {
        self.summary_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fan_out(&self, duration: Duration) {
        self.fan_out_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_consolidate(&self, duration: Duration) {
        self.consolidate_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_refine(&self, duration: Duration) {
        self.refine_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_synthesize(&self, duration: Duration) {
        self.synthesize_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            branches_total: self.branches_total.load(Ordering::Relaxed),
            branches_lost: self.branches_lost.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            fragments_total: self.fragments_total.load(Ordering::Relaxed),
            items_extracted: self.items_extracted.load(Ordering::Relaxed),
            reconciler_fallbacks: self.reconciler_fallbacks.load(Ordering::Relaxed),
            refinement_fail_open: self.refinement_fail_open.load(Ordering::Relaxed),
            summary_errors: self.summary_errors.load(Ordering::Relaxed),
            fan_out_time_ms: Self::to_ms(&self.fan_out_time_us),
            consolidate_time_ms: Self::to_ms(&self.consolidate_time_us),
            refine_time_ms: Self::to_ms(&self.refine_time_us),
            synthesize_time_ms: Self::to_ms(&self.synthesize_time_us),
        }
    }

    fn to_ms(total_us: &AtomicU64) -> f64 {
        total_us.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub branches_total: usize,
    pub branches_lost: usize,
    pub parse_failures: usize,
    pub extraction_failures: usize,
    pub fragments_total: usize,
    pub items_extracted: usize,
    pub reconciler_fallbacks: usize,
    pub refinement_fail_open: usize,
    pub summary_errors: usize,
    pub fan_out_time_ms: f64,
    pub consolidate_time_ms: f64,
    pub refine_time_ms: f64,
    pub synthesize_time_ms: f64,
}

impl MetricsSnapshot {
    /// True when at least one failure was absorbed somewhere in the run
    pub fn degraded(&self) -> bool {
        self.branches_lost
            + self.parse_failures
            + self.extraction_failures
            + self.reconciler_fallbacks
            + self.refinement_fail_open
            + self.summary_errors
            > 0
    }
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
