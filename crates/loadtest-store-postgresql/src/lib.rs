//! PostgreSQL / CockroachDB backend for the workload engine.
//!
//! Provides a [`loadtest_engine::Store`] over a small connection pool. Each
//! transaction runs on its own pooled connection with an explicit
//! `BEGIN TRANSACTION ISOLATION LEVEL ...`; serialization failures (`40001`)
//! and deadlocks (`40P01`) surface as retryable conflicts.

pub mod error;
pub mod pool;
pub mod schema;
pub mod store;
pub mod transaction;

pub use error::PostgresStoreError;
pub use pool::{PgPool, PooledClient};
pub use store::{PostgresStore, DEFAULT_BATCH_SIZE};
pub use transaction::PgTransaction;
