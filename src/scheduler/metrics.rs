//! Hand-rolled scheduler counters (§4.5).
//!
//! Plain atomics rather than a dedicated metrics crate: this is hot
//! pipeline code with a handful of counters, not a metrics surface.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SchedulerMetrics {
    processed: AtomicU64,
    dropped: AtomicU64,
    queue_full_events: AtomicU64,
    batches_processed: AtomicU64,
}

/// Point-in-time counter values, for `/api/ai/status`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub dropped: u64,
    pub queue_full_events: u64,
    pub batches_processed: u64,
}

impl SchedulerMetrics {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.queue_full_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queue_full_events: self.queue_full_events.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = SchedulerMetrics::default();
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_dropped();
        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.queue_full_events, 0);
    }
}
