//! CLI argument definitions.

use crate::config::parse_duration;
use clap::{Args, ValueEnum};
use loadtest_store_postgresql::DEFAULT_BATCH_SIZE;
use rust_decimal::Decimal;
use std::time::Duration;

/// Which store the workload runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// PostgreSQL or CockroachDB over the PostgreSQL wire protocol
    Postgresql,
    /// In-process store, no database needed
    Memory,
}

/// Summary output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    /// One JSON object on a single line
    Json,
}

/// Arguments shared by every workload.
#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    /// Database connection string (e.g., postgresql://root@localhost:26257/defaultdb)
    #[arg(long, env = "DATABASE_URL")]
    pub url: Option<String>,

    /// Store to run against
    #[arg(long, value_enum, default_value = "postgresql")]
    pub backend: Backend,

    /// Target requests per second
    #[arg(long, default_value = "100")]
    pub qps: u64,

    /// Maximum number of transactions in flight
    #[arg(long, default_value = "8")]
    pub concurrency: usize,

    /// How long to run (e.g., "10s", "500ms", "2m")
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub duration: Duration,

    /// Transaction isolation level: "read committed" or "serializable"
    #[arg(long, default_value = "serializable")]
    pub isolation: String,

    /// Maximum attempts per transaction when it hits a serialization conflict
    #[arg(long, default_value = "50")]
    pub max_retries: u32,

    /// How long to wait for in-flight transactions after the run ends
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub drain_timeout: Duration,

    /// Interval between status lines
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub status_interval: Duration,

    /// Random seed for key sampling and generated values
    #[arg(long)]
    pub seed: Option<u64>,

    /// Summary output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Batch size for seed inserts
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

/// Conserved-quantity workload arguments.
#[derive(Args, Clone, Debug)]
pub struct TransferArgs {
    /// Number of accounts to seed
    #[arg(long, default_value = "100000")]
    pub accounts: usize,

    /// Number of accounts sampled for the run; smaller means more contention
    #[arg(long, default_value = "10")]
    pub selection: usize,

    /// Balance every account starts with
    #[arg(long, default_value = "10000")]
    pub initial_balance: Decimal,

    /// Amount moved by each transfer
    #[arg(long, default_value = "5")]
    pub amount: Decimal,

    /// Leave the account table in place after the run
    #[arg(long)]
    pub keep_data: bool,

    /// Exit with status 2 if the sampled total changed
    #[arg(long)]
    pub fail_on_violation: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Product read/write workload arguments.
#[derive(Args, Clone, Debug)]
pub struct MixedArgs {
    /// Number of products to seed
    #[arg(long, default_value = "10000")]
    pub products: usize,

    /// Number of products sampled for the run (default: all)
    #[arg(long)]
    pub selection: Option<usize>,

    /// Share of --qps spent on writes
    #[arg(long, default_value = "20")]
    pub write_percent: u8,

    /// Read rate; overrides --qps and --write-percent together with --write-qps
    #[arg(long, requires = "write_qps")]
    pub read_qps: Option<u64>,

    /// Write rate; overrides --qps and --write-percent together with --read-qps
    #[arg(long, requires = "read_qps")]
    pub write_qps: Option<u64>,

    #[command(flatten)]
    pub common: CommonArgs,
}
