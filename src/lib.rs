//! isolation-loadtest library
//!
//! Drives a contended read-modify-write workload against a database and reports
//! whether the chosen isolation level kept a conserved total intact.
//!
//! # Workloads
//!
//! - `transfer` - paired debit/credit transfers between a small sample of
//!   accounts; the sampled balances must sum to the same total afterwards
//! - `mixed` - product reads and overwrites for latency under contention
//!
//! # CLI Usage
//!
//! ```bash
//! # Serializable transfers against CockroachDB
//! isolation-loadtest transfer --url postgresql://root@localhost:26257/defaultdb
//!
//! # Read committed with two hot accounts: watch the total drift
//! isolation-loadtest transfer --isolation "read committed" --selection 2 --url ...
//!
//! # Dry run without a database
//! isolation-loadtest transfer --backend memory --accounts 1000 --duration 5s
//! ```

pub mod cli;
pub mod config;
pub mod logging;
pub mod runner;

pub use cli::{Backend, CommonArgs, MixedArgs, OutputFormat, TransferArgs};
pub use runner::{run_workload, RunOptions, RunStatus};
