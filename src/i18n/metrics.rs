//! Engine metrics and observability module.
//!
//! Counters for the hot render path: memo hits, store lookups, fallback
//! servings, lazy taggings and downgraded failures.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Global engine metrics singleton.
pub struct EngineMetrics {
    /// Number of marker lookups served from the per-request memo
    memo_hits: AtomicUsize,

    /// Number of marker lookups that went to the translation store
    store_lookups: AtomicUsize,

    /// Number of lookups that fell back to the source (`other`) text
    fallbacks: AtomicUsize,

    /// Number of never-tagged blobs tagged lazily at render time
    lazy_taggings: AtomicUsize,

    /// Number of render-path failures downgraded to the original text
    render_failures: AtomicUsize,
}

/// Global metrics instance (initialized lazily)
static METRICS: OnceLock<EngineMetrics> = OnceLock::new();

impl EngineMetrics {
    /// Get the global engine metrics instance.
    pub fn global() -> &'static EngineMetrics {
        METRICS.get_or_init(|| EngineMetrics {
            memo_hits: AtomicUsize::new(0),
            store_lookups: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
            lazy_taggings: AtomicUsize::new(0),
            render_failures: AtomicUsize::new(0),
        })
    }

    /// Record a marker lookup served from the per-request memo.
    pub fn record_memo_hit(&self) {
        self.memo_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a marker lookup that reached the translation store.
    pub fn record_store_lookup(&self) {
        self.store_lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup served via the fallback chain.
    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a blob tagged lazily at render time.
    pub fn record_lazy_tagging(&self) {
        self.lazy_taggings.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a render-path failure downgraded to the original text.
    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current memo hit count.
    pub fn memo_hits(&self) -> usize {
        self.memo_hits.load(Ordering::Relaxed)
    }

    /// Get the current store lookup count.
    pub fn store_lookups(&self) -> usize {
        self.store_lookups.load(Ordering::Relaxed)
    }

    /// Get the current fallback count.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Get the current lazy tagging count.
    pub fn lazy_taggings(&self) -> usize {
        self.lazy_taggings.load(Ordering::Relaxed)
    }

    /// Get the current render failure count.
    pub fn render_failures(&self) -> usize {
        self.render_failures.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let memo_hits = self.memo_hits();
        let store_lookups = self.store_lookups();
        let total_lookups = memo_hits + store_lookups;
        let memo_hit_rate = if total_lookups > 0 {
            (memo_hits as f64 / total_lookups as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            memo_hits,
            store_lookups,
            memo_hit_rate,
            fallbacks: self.fallbacks(),
            lazy_taggings: self.lazy_taggings(),
            render_failures: self.render_failures(),
        }
    }

    /// Reset all metrics to zero (useful for testing).
    #[cfg(test)]
    pub fn reset(&self) {
        self.memo_hits.store(0, Ordering::Relaxed);
        self.store_lookups.store(0, Ordering::Relaxed);
        self.fallbacks.store(0, Ordering::Relaxed);
        self.lazy_taggings.store(0, Ordering::Relaxed);
        self.render_failures.store(0, Ordering::Relaxed);
    }
}

/// Metrics report containing current engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    /// Number of memo hits
    pub memo_hits: usize,

    /// Number of store lookups
    pub store_lookups: usize,

    /// Memo hit rate as a percentage (0-100)
    pub memo_hit_rate: f64,

    /// Number of fallback servings
    pub fallbacks: usize,

    /// Number of lazy taggings
    pub lazy_taggings: usize,

    /// Number of downgraded render failures
    pub render_failures: usize,
}
