//! Rate-bounded concurrent transactional workload engine.
//!
//! This crate drives a transactional workload against any [`Store`] and
//! checks whether the selected isolation level kept a conserved total intact:
//! 1. Seed a table and sample a fixed pool of keys
//! 2. Run one rate-limited loop per operation kind, bounded by a shared
//!    concurrency limit
//! 3. Cancel, drain in-flight transactions, then sum the sampled balances
//!
//! # Example
//!
//! ```ignore
//! use loadtest_engine::{MemoryStore, Orchestrator, RunConfig, TransferConfig, WorkloadConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RunConfig::new(WorkloadConfig::Transfer(TransferConfig::default()))
//!     .with_qps(200)
//!     .with_concurrency(16);
//!
//! let orchestrator = Orchestrator::new(config, Arc::new(MemoryStore::new()))?;
//! let summary = orchestrator.run(CancellationToken::new()).await?;
//! println!("{summary}");
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod latency;
pub mod limiter;
pub mod memory;
pub mod orchestrator;
pub mod report;
pub mod stats;
pub mod store;
pub mod throttle;
pub mod workload;

pub use config::{
    IsolationLevel, Mix, MixedConfig, RetryPolicy, RunConfig, TransferConfig, WorkloadConfig,
};
pub use error::{ConfigError, OpError, RunError, Step, StepExt, StoreError};
pub use executor::{Outcome, TransactionExecutor};
pub use latency::{LatencyRecorder, LatencySummary};
pub use limiter::{Admission, ConcurrencyLimiter, DrainOutcome};
pub use memory::MemoryStore;
pub use orchestrator::{LogObserver, Orchestrator, RunObserver, RunPhase};
pub use report::{InvariantCheck, KindSummary, RunSummary};
pub use stats::{OpKind, OpStats, Progress, RunStats};
pub use store::{KeySelection, Product, Store, Table, Transaction};
pub use throttle::Throttle;
pub use workload::{KeySampler, Operation, OperationSource, ProductGenerator, Transfer};
