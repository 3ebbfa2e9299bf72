//! Per-run counters and latency, owned by the run rather than the process.

use crate::latency::{as_millis, LatencyRecorder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Kind of operation a workload loop issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Transfer,
    Read,
    Write,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Transfer => write!(f, "transfer"),
            OpKind::Read => write!(f, "read"),
            OpKind::Write => write!(f, "write"),
        }
    }
}

/// Counters and latencies for one operation kind.
#[derive(Debug, Default)]
pub struct OpStats {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
    latencies: LatencyRecorder,
}

impl OpStats {
    fn with_capacity(capacity: Option<usize>) -> Self {
        let latencies = match capacity {
            Some(capacity) => LatencyRecorder::bounded(capacity),
            None => LatencyRecorder::unbounded(),
        };
        Self {
            latencies,
            ..Default::default()
        }
    }

    pub fn record_committed(&self, elapsed: Duration, attempts: u32) {
        self.latencies.record(elapsed);
        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, elapsed: Duration, attempts: u32) {
        self.latencies.record(elapsed);
        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn latencies(&self) -> &LatencyRecorder {
        &self.latencies
    }
}

/// Run context shared by every worker of a single run.
#[derive(Debug)]
pub struct RunStats {
    transfer: OpStats,
    read: OpStats,
    write: OpStats,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RunStats {
    pub fn new(latency_capacity: Option<usize>) -> Self {
        Self {
            transfer: OpStats::with_capacity(latency_capacity),
            read: OpStats::with_capacity(latency_capacity),
            write: OpStats::with_capacity(latency_capacity),
        }
    }

    pub fn kind(&self, kind: OpKind) -> &OpStats {
        match kind {
            OpKind::Transfer => &self.transfer,
            OpKind::Read => &self.read,
            OpKind::Write => &self.write,
        }
    }

    /// Live view for the given kinds.
    pub fn progress(&self, kinds: &[OpKind], elapsed: Duration, remaining: Duration) -> Progress {
        Progress {
            elapsed,
            remaining,
            kinds: kinds
                .iter()
                .map(|kind| {
                    let stats = self.kind(*kind);
                    KindProgress {
                        kind: *kind,
                        completed: stats.completed(),
                        failed: stats.failed(),
                        mean: stats.latencies().running_mean(),
                    }
                })
                .collect(),
        }
    }
}

/// Snapshot emitted by the live reporting loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub elapsed: Duration,
    pub remaining: Duration,
    pub kinds: Vec<KindProgress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindProgress {
    pub kind: OpKind,
    pub completed: u64,
    pub failed: u64,
    pub mean: Option<Duration>,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "time left: {}s", self.remaining.as_secs())?;
        for kind in &self.kinds {
            write!(
                f,
                " | {}: {} ok, {} failed",
                kind.kind, kind.completed, kind.failed
            )?;
            if let Some(mean) = kind.mean {
                write!(f, ", avg {}ms", as_millis(mean))?;
            }
        }
        Ok(())
    }
}
