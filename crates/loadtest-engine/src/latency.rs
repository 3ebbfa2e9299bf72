//! Concurrent latency recording.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Collects transaction durations from many workers.
///
/// Samples live behind a short mutex; the all-time count and total are kept in
/// atomics so the running mean stays exact even when a bounded recorder has
/// evicted older samples.
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    samples: Mutex<VecDeque<Duration>>,
    capacity: Option<usize>,
    count: AtomicU64,
    total_nanos: AtomicU64,
}

/// Aggregate view over recorded latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySummary {
    /// Nothing was recorded.
    NoData,
    Stats {
        /// All-time sample count.
        count: u64,
        /// All-time arithmetic mean.
        mean: Duration,
        /// Percentiles over the retained window.
        p50: Duration,
        p95: Duration,
        p99: Duration,
    },
}

impl LatencySummary {
    /// Mean in whole milliseconds, `None` when there is no data.
    pub fn mean_ms(&self) -> Option<u64> {
        match self {
            LatencySummary::NoData => None,
            LatencySummary::Stats { mean, .. } => Some(as_millis(*mean)),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            LatencySummary::NoData => 0,
            LatencySummary::Stats { count, .. } => *count,
        }
    }
}

impl LatencyRecorder {
    /// Recorder that keeps every sample.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Recorder that keeps only the most recent `capacity` samples.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity.max(1)),
            ..Default::default()
        }
    }

    pub fn record(&self, elapsed: Duration) {
        {
            let mut samples = self.lock();
            if let Some(capacity) = self.capacity {
                if samples.len() >= capacity {
                    samples.pop_front();
                }
            }
            samples.push_back(elapsed);
        }

        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of the retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<Duration> {
        self.lock().iter().copied().collect()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean over every sample ever recorded.
    pub fn running_mean(&self) -> Option<Duration> {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let total = self.total_nanos.load(Ordering::Relaxed);
        Some(Duration::from_nanos(total / count))
    }

    pub fn summary(&self) -> LatencySummary {
        let Some(mean) = self.running_mean() else {
            return LatencySummary::NoData;
        };

        let mut window = self.snapshot();
        window.sort_unstable();

        LatencySummary::Stats {
            count: self.count(),
            mean,
            p50: percentile(&window, 50.0),
            p95: percentile(&window, 95.0),
            p99: percentile(&window, 99.0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Duration>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub(crate) fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_summary_is_no_data() {
        let recorder = LatencyRecorder::unbounded();
        assert_eq!(recorder.summary(), LatencySummary::NoData);
        assert_eq!(recorder.summary().mean_ms(), None);
        assert_eq!(recorder.running_mean(), None);
    }

    #[test]
    fn test_mean_of_three_samples() {
        let recorder = LatencyRecorder::unbounded();
        for ms in [10, 20, 30] {
            recorder.record(Duration::from_millis(ms));
        }

        let summary = recorder.summary();
        assert_eq!(summary.mean_ms(), Some(20));
        assert_eq!(summary.count(), 3);
        assert_eq!(recorder.snapshot().len(), 3);
    }

    #[test]
    fn test_percentiles() {
        let recorder = LatencyRecorder::unbounded();
        for ms in 1..=100 {
            recorder.record(Duration::from_millis(ms));
        }

        match recorder.summary() {
            LatencySummary::Stats { p50, p95, p99, .. } => {
                assert_eq!(p50, Duration::from_millis(50));
                assert_eq!(p95, Duration::from_millis(95));
                assert_eq!(p99, Duration::from_millis(99));
            }
            LatencySummary::NoData => panic!("expected stats"),
        }
    }

    #[test]
    fn test_bounded_keeps_recent_window_but_exact_mean() {
        let recorder = LatencyRecorder::bounded(2);
        for ms in [10, 20, 30] {
            recorder.record(Duration::from_millis(ms));
        }

        assert_eq!(
            recorder.snapshot(),
            vec![Duration::from_millis(20), Duration::from_millis(30)]
        );
        assert_eq!(recorder.summary().mean_ms(), Some(20));
        assert_eq!(recorder.count(), 3);
    }

    #[test]
    fn test_concurrent_recording() {
        let recorder = Arc::new(LatencyRecorder::unbounded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        recorder.record(Duration::from_millis(1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recorder.count(), 8000);
        assert_eq!(recorder.snapshot().len(), 8000);
        assert_eq!(recorder.summary().mean_ms(), Some(1));
    }
}
