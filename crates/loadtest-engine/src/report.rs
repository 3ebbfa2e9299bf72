//! Run summary and invariant check.

use crate::config::{IsolationLevel, RunConfig};
use crate::latency::{as_millis, LatencySummary};
use crate::limiter::DrainOutcome;
use crate::stats::{OpKind, OpStats};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Comparison of the conserved total against its expected value.
///
/// A non-zero difference is a result, not an error: it is what the run is
/// there to observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantCheck {
    pub expected: Decimal,
    pub actual: Decimal,
    /// `actual - expected`, exact.
    pub difference: Decimal,
    pub holds: bool,
}

impl InvariantCheck {
    pub fn new(expected: Decimal, actual: Decimal) -> Self {
        let difference = actual - expected;
        Self {
            expected,
            actual,
            difference,
            holds: difference.is_zero(),
        }
    }
}

/// Final counters and latency for one operation kind. Latencies are whole
/// milliseconds and absent when nothing was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub kind: OpKind,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub mean_ms: Option<u64>,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

impl KindSummary {
    pub fn from_stats(kind: OpKind, stats: &OpStats) -> Self {
        let (mean_ms, p50_ms, p95_ms, p99_ms) = match stats.latencies().summary() {
            LatencySummary::NoData => (None, None, None, None),
            LatencySummary::Stats {
                mean, p50, p95, p99, ..
            } => (
                Some(as_millis(mean)),
                Some(as_millis(p50)),
                Some(as_millis(p95)),
                Some(as_millis(p99)),
            ),
        };

        Self {
            kind,
            completed: stats.completed(),
            failed: stats.failed(),
            cancelled: stats.cancelled(),
            retries: stats.retries(),
            mean_ms,
            p50_ms,
            p95_ms,
            p99_ms,
        }
    }

    /// Operations that ran to a result, committed or failed.
    pub fn requests(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub backend: String,
    pub isolation: IsolationLevel,
    pub sample_size: usize,
    pub concurrency: usize,
    pub target_qps: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// The run was stopped by an interrupt before its duration elapsed.
    pub interrupted: bool,
    pub kinds: Vec<KindSummary>,
    /// Present for the transfer workload only.
    pub invariant: Option<InvariantCheck>,
    pub drain: DrainOutcome,
    pub config: RunConfig,
}

impl RunSummary {
    pub fn total_requests(&self) -> u64 {
        self.kinds.iter().map(KindSummary::requests).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.kinds.iter().map(|k| k.failed).sum()
    }

    /// Whether the conserved total diverged.
    pub fn violated(&self) -> bool {
        self.invariant.as_ref().is_some_and(|check| !check.holds)
    }

    /// Single-line JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "backend:          {}", self.backend)?;
        writeln!(f, "isolation level:  {}", self.isolation)?;
        writeln!(f, "sample size:      {}", self.sample_size)?;
        writeln!(f, "concurrency:      {}", self.concurrency)?;
        write!(f, "elapsed:          {}ms", self.elapsed_ms)?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        writeln!(f)?;
        writeln!(f, "total requests:   {}", self.total_requests())?;
        writeln!(f, "total failures:   {}", self.total_failures())?;

        for kind in &self.kinds {
            write!(
                f,
                "{:<17} {} ok, {} failed, {} cancelled, {} retries",
                format!("{}:", kind.kind),
                kind.completed,
                kind.failed,
                kind.cancelled,
                kind.retries
            )?;
            match (kind.mean_ms, kind.p50_ms, kind.p95_ms, kind.p99_ms) {
                (Some(mean), Some(p50), Some(p95), Some(p99)) => writeln!(
                    f,
                    ", avg {mean}ms (p50 {p50}ms, p95 {p95}ms, p99 {p99}ms)"
                )?,
                _ => writeln!(f, ", no latency data")?,
            }
        }

        if let DrainOutcome::Abandoned { in_flight } = self.drain {
            writeln!(f, "abandoned:        {in_flight} transactions still in flight")?;
        }

        if let Some(check) = &self.invariant {
            writeln!(f, "expected balance: {}", check.expected)?;
            writeln!(f, "actual balance:   {}", check.actual)?;
            write!(f, "difference:       {}", check.difference)?;
            if !check.holds {
                write!(f, " (lost updates detected)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
