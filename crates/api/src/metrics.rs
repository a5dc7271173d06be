use assemble::PipelineStats;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    total_runs: AtomicUsize,
    cancelled_runs: AtomicUsize,

    // Timing (in microseconds)
    total_run_time_us: AtomicU64,

    // Counts
    records_mapped: AtomicUsize,
    mapping_failures: AtomicUsize,
    mentions_grounded: AtomicUsize,
    mentions_ungrounded: AtomicUsize,
    trials_merged: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_runs: AtomicUsize::new(0),
            cancelled_runs: AtomicUsize::new(0),
            total_run_time_us: AtomicU64::new(0),
            records_mapped: AtomicUsize::new(0),
            mapping_failures: AtomicUsize::new(0),
            mentions_grounded: AtomicUsize::new(0),
            mentions_ungrounded: AtomicUsize::new(0),
            trials_merged: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_run(&self, duration: Duration, stats: &PipelineStats, cancelled: bool) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if cancelled {
            self.cancelled_runs.fetch_add(1, Ordering::Relaxed);
        }
        self.total_run_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.records_mapped.fetch_add(stats.records_mapped, Ordering::Relaxed);
        self.mapping_failures.fetch_add(stats.mapping_failures, Ordering::Relaxed);
        self.mentions_grounded.fetch_add(stats.grounded_mentions, Ordering::Relaxed);
        self.mentions_ungrounded.fetch_add(stats.ungrounded_mentions, Ordering::Relaxed);
        self.trials_merged.fetch_add(stats.merged_trials, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_runs: self.total_runs.load(Ordering::Relaxed),
            cancelled_runs: self.cancelled_runs.load(Ordering::Relaxed),
            avg_run_time_ms: self.avg_time_ms(&self.total_run_time_us, &self.total_runs),
            records_mapped: self.records_mapped.load(Ordering::Relaxed),
            mapping_failures: self.mapping_failures.load(Ordering::Relaxed),
            mentions_grounded: self.mentions_grounded.load(Ordering::Relaxed),
            mentions_ungrounded: self.mentions_ungrounded.load(Ordering::Relaxed),
            trials_merged: self.trials_merged.load(Ordering::Relaxed),
        }
    }

    fn avg_time_ms(&self, total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
        let total = total_us.load(Ordering::Relaxed) as f64;
        let cnt = count.load(Ordering::Relaxed) as f64;
        if cnt > 0.0 {
            total / cnt / 1000.0 // Convert to ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_runs: usize,
    pub cancelled_runs: usize,
    pub avg_run_time_ms: f64,
    pub records_mapped: usize,
    pub mapping_failures: usize,
    pub mentions_grounded: usize,
    pub mentions_ungrounded: usize,
    pub trials_merged: usize,
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
