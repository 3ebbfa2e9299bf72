//! Error types for the workload engine.

use crate::orchestrator::RunPhase;
use crate::store::Table;
use thiserror::Error;

/// Errors raised while validating a run configuration.
///
/// These are always reported before any connection is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Isolation level name not recognised.
    #[error("invalid isolation level '{0}' (expected 'read committed' or 'serializable')")]
    InvalidIsolation(String),

    /// A rate, duration, size or concurrency that must be positive was zero.
    #[error("{name} must be greater than zero")]
    NonPositive { name: &'static str },

    /// Write percentage outside 0..=100.
    #[error("write percent must be between 0 and 100, got {0}")]
    WritePercent(u8),

    /// A non-zero write share of the target rate that floors to no writes.
    #[error("write percent {percent} of {qps} qps leaves a write rate of zero")]
    WriteRateTooLow { percent: u8, qps: u64 },

    /// Sample larger than the key pool it is drawn from.
    #[error("sample size {sample} exceeds key pool size {pool}")]
    SampleExceedsPool { sample: usize, pool: usize },

    /// Transfers need two distinct keys.
    #[error("transfer workload needs a sample of at least 2 keys, got {0}")]
    SampleTooSmall(usize),

    /// Value does not fit the underlying primitive.
    #[error("{name} is too large: {value}")]
    TooLarge { name: &'static str, value: u64 },
}

/// Errors reported by a data access backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("record '{key}' not found in {table}")]
    NotFound { table: Table, key: String },

    /// Transient serialization conflict; the whole transaction may be retried.
    #[error("serialization conflict: {0}")]
    Conflict(String),

    /// Any other backend failure.
    #[error("{0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap a backend-specific error.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StoreError::Backend(err.into())
    }

    /// Whether re-running the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Logical step of an operation, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Begin,
    FetchSource,
    FetchDestination,
    DebitSource,
    CreditDestination,
    FetchProduct,
    UpdateProduct,
    Commit,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::Begin => "beginning transaction",
            Step::FetchSource => "fetching balance from source account",
            Step::FetchDestination => "fetching balance from destination account",
            Step::DebitSource => "debiting source account",
            Step::CreditDestination => "crediting destination account",
            Step::FetchProduct => "fetching product",
            Step::UpdateProduct => "updating product",
            Step::Commit => "committing transaction",
        };
        f.write_str(s)
    }
}

/// A store error tagged with the step that produced it.
#[derive(Error, Debug)]
#[error("{step}: {source}")]
pub struct OpError {
    pub step: Step,
    #[source]
    pub source: StoreError,
}

impl OpError {
    pub fn new(step: Step, source: StoreError) -> Self {
        Self { step, source }
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Tags a store result with the step it belongs to.
pub trait StepExt<T> {
    fn step(self, step: Step) -> Result<T, OpError>;
}

impl<T> StepExt<T> for Result<T, StoreError> {
    fn step(self, step: Step) -> Result<T, OpError> {
        self.map_err(|e| OpError::new(step, e))
    }
}

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Setup (schema, seed, key sampling) or final read failed.
    #[error("{stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    /// The key pool is too small for the workload.
    #[error("not enough keys to run the workload: needed {needed}, found {found}")]
    InsufficientKeys { needed: usize, found: usize },

    /// The lifecycle state machine was driven backwards.
    #[error("invalid phase transition from {from} to {to}")]
    Phase { from: RunPhase, to: RunPhase },
}

impl RunError {
    pub(crate) fn setup(stage: &'static str) -> impl FnOnce(StoreError) -> RunError {
        move |source| RunError::Setup { stage, source }
    }
}
