//! Run configuration.

use crate::error::ConfigError;
use crate::stats::OpKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Transaction isolation level requested for every workload transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling used in `BEGIN TRANSACTION ISOLATION LEVEL ...`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = ConfigError;

    /// Accepts `read committed`, `READ_COMMITTED`, `read-committed` and `serializable`
    /// in any case. Anything else is rejected; there is no fallback.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        match normalized.as_str() {
            "read committed" => Ok(IsolationLevel::ReadCommitted),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(ConfigError::InvalidIsolation(s.to_string())),
        }
    }
}

/// Retry policy for conflict-class transaction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per operation, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Conserved-quantity workload: paired debit/credit transfers between accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of accounts seeded.
    pub accounts: usize,
    /// Number of accounts sampled once and used for every transfer.
    pub selection: usize,
    /// Balance every account is seeded with.
    pub initial_balance: Decimal,
    /// Amount moved by each transfer.
    pub amount: Decimal,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            accounts: 100_000,
            selection: 10,
            initial_balance: Decimal::from(10_000),
            amount: Decimal::from(5),
        }
    }
}

/// How the mixed workload splits its rate between reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mix {
    /// Percentage of `target_qps` spent on writes; the rest are reads.
    WritePercent(u8),
    /// Independent rates; `target_qps` is ignored.
    Explicit { read_qps: u64, write_qps: u64 },
}

/// Independent-mutation workload: product reads and overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedConfig {
    /// Number of products seeded.
    pub products: usize,
    /// Fixed-size sample; `None` uses the whole table as the key pool.
    pub selection: Option<usize>,
    pub mix: Mix,
}

impl Default for MixedConfig {
    fn default() -> Self {
        Self {
            products: 10_000,
            selection: None,
            mix: Mix::WritePercent(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum WorkloadConfig {
    Transfer(TransferConfig),
    Mixed(MixedConfig),
}

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Requests per second across all loops (split by the mix for mixed workloads).
    pub target_qps: u64,
    /// Maximum in-flight operations.
    pub concurrency: usize,
    /// Wall-clock run length.
    pub duration: Duration,
    pub isolation: IsolationLevel,
    pub workload: WorkloadConfig,
    pub retry: RetryPolicy,
    /// How long to wait for in-flight work after cancellation.
    pub drain_timeout: Duration,
    /// Interval between live status reports.
    pub status_interval: Duration,
    /// Seed for key sampling and generated values; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Keep at most this many latency samples per kind (`None` keeps all).
    pub latency_capacity: Option<usize>,
}

impl RunConfig {
    /// Create a configuration with defaults for everything but the workload.
    pub fn new(workload: WorkloadConfig) -> Self {
        Self {
            target_qps: 100,
            concurrency: 8,
            duration: Duration::from_secs(10),
            isolation: IsolationLevel::Serializable,
            workload,
            retry: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(5),
            status_interval: Duration::from_secs(1),
            seed: None,
            latency_capacity: None,
        }
    }

    pub fn with_qps(mut self, qps: u64) -> Self {
        self.target_qps = qps;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_latency_capacity(mut self, capacity: Option<usize>) -> Self {
        self.latency_capacity = capacity;
        self
    }

    /// Check every constraint that can be checked without a database.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::NonPositive {
                name: "concurrency",
            });
        }
        if u32::try_from(self.concurrency).is_err() {
            return Err(ConfigError::TooLarge {
                name: "concurrency",
                value: self.concurrency as u64,
            });
        }
        if self.duration.is_zero() {
            return Err(ConfigError::NonPositive { name: "duration" });
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::NonPositive {
                name: "status interval",
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NonPositive {
                name: "max attempts",
            });
        }
        if self.latency_capacity == Some(0) {
            return Err(ConfigError::NonPositive {
                name: "latency capacity",
            });
        }

        match &self.workload {
            WorkloadConfig::Transfer(transfer) => {
                if transfer.accounts == 0 {
                    return Err(ConfigError::NonPositive { name: "accounts" });
                }
                if transfer.selection < 2 {
                    return Err(ConfigError::SampleTooSmall(transfer.selection));
                }
                if transfer.selection > transfer.accounts {
                    return Err(ConfigError::SampleExceedsPool {
                        sample: transfer.selection,
                        pool: transfer.accounts,
                    });
                }
                if transfer.amount <= Decimal::ZERO {
                    return Err(ConfigError::NonPositive {
                        name: "transfer amount",
                    });
                }
            }
            WorkloadConfig::Mixed(mixed) => {
                if mixed.products == 0 {
                    return Err(ConfigError::NonPositive { name: "products" });
                }
                match mixed.selection {
                    Some(0) => {
                        return Err(ConfigError::NonPositive {
                            name: "sample size",
                        })
                    }
                    Some(sample) if sample > mixed.products => {
                        return Err(ConfigError::SampleExceedsPool {
                            sample,
                            pool: mixed.products,
                        })
                    }
                    _ => {}
                }
                if let Mix::WritePercent(pct) = mixed.mix {
                    if pct > 100 {
                        return Err(ConfigError::WritePercent(pct));
                    }
                    if pct > 0
                        && self.target_qps > 0
                        && self.target_qps.saturating_mul(u64::from(pct)) < 100
                    {
                        return Err(ConfigError::WriteRateTooLow {
                            percent: pct,
                            qps: self.target_qps,
                        });
                    }
                }
            }
        }

        if self.loop_rates().is_empty() {
            return Err(ConfigError::NonPositive { name: "target qps" });
        }

        Ok(())
    }

    /// Target rate per operation kind. Kinds with a zero rate get no loop.
    pub fn loop_rates(&self) -> Vec<(OpKind, u64)> {
        let rates = match &self.workload {
            WorkloadConfig::Transfer(_) => vec![(OpKind::Transfer, self.target_qps)],
            WorkloadConfig::Mixed(mixed) => match mixed.mix {
                Mix::WritePercent(pct) => {
                    let write = self.target_qps.saturating_mul(u64::from(pct.min(100))) / 100;
                    let read = self.target_qps - write;
                    vec![(OpKind::Read, read), (OpKind::Write, write)]
                }
                Mix::Explicit {
                    read_qps,
                    write_qps,
                } => vec![(OpKind::Read, read_qps), (OpKind::Write, write_qps)],
            },
        };

        rates.into_iter().filter(|(_, rate)| *rate > 0).collect()
    }

    /// Number of keys the workload needs from the key pool.
    pub fn required_keys(&self) -> usize {
        match &self.workload {
            WorkloadConfig::Transfer(_) => 2,
            WorkloadConfig::Mixed(_) => 1,
        }
    }
}
