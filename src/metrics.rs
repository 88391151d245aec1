use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime counters for the enumeration job.
///
/// Purpose:
/// - Track registered / failed data sources
/// - Track throughput (discovered / stored names)
/// - Track contained collector failures
///
/// Design:
/// - Lock-free (Atomics)
/// - Reporting only; no control decision reads these
#[derive(Default)]
pub struct RuntimeMetrics {
    // Registry
    pub sources_active: AtomicUsize,
    pub sources_failed: AtomicUsize,

    // Throughput
    pub names_discovered: AtomicUsize,
    pub names_stored: AtomicUsize,
    pub executions_completed: AtomicUsize,
    pub names_resolved: AtomicUsize,

    // Contained failures
    pub request_errors: AtomicUsize,
    pub parse_errors: AtomicUsize,
    pub store_errors: AtomicUsize,
    pub resolve_errors: AtomicUsize,

    // Memory watchdog
    pub high_memory_samples: AtomicUsize,
    pub baseline_raises: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "src={} src_failed={} found={} stored={} execs={} resolved={} req_err={} parse_err={} store_err={} resolve_err={} mem_high={} mem_raise={}",
            self.sources_active.load(Ordering::Relaxed),
            self.sources_failed.load(Ordering::Relaxed),
            self.names_discovered.load(Ordering::Relaxed),
            self.names_stored.load(Ordering::Relaxed),
            self.executions_completed.load(Ordering::Relaxed),
            self.names_resolved.load(Ordering::Relaxed),
            self.request_errors.load(Ordering::Relaxed),
            self.parse_errors.load(Ordering::Relaxed),
            self.store_errors.load(Ordering::Relaxed),
            self.resolve_errors.load(Ordering::Relaxed),
            self.high_memory_samples.load(Ordering::Relaxed),
            self.baseline_raises.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Shorthand for bumping a counter by one.
pub fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}
