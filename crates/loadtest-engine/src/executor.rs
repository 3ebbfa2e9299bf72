//! Transaction execution with conflict retries.

use crate::config::{IsolationLevel, RetryPolicy};
use crate::error::{OpError, Step, StepExt};
use crate::stats::RunStats;
use crate::store::Store;
use crate::workload::Operation;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How a single `execute` call ended.
#[derive(Debug)]
pub enum Outcome {
    Committed {
        elapsed: Duration,
        attempts: u32,
    },
    Failed {
        elapsed: Duration,
        attempts: u32,
        error: OpError,
    },
    /// The run was cancelled while the transaction was in flight. Whatever
    /// the transaction had done is rolled back.
    Cancelled,
}

/// Runs operations inside transactions at a fixed isolation level.
///
/// Conflict-class failures roll back and re-run the whole operation body
/// until the retry policy is exhausted. Every other error is returned on the
/// first occurrence, tagged with the step that failed.
#[derive(Clone)]
pub struct TransactionExecutor {
    store: Arc<dyn Store>,
    isolation: IsolationLevel,
    retry: RetryPolicy,
    stats: Arc<RunStats>,
}

impl TransactionExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        isolation: IsolationLevel,
        retry: RetryPolicy,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            store,
            isolation,
            retry,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    /// Execute `op` and record the outcome in the run stats.
    ///
    /// Cancellation drops the in-flight attempt, which rolls the open
    /// transaction back, and is counted separately from failures.
    pub async fn execute(&self, op: &dyn Operation, cancel: &CancellationToken) -> Outcome {
        let kind = op.kind();
        let stats = self.stats.kind(kind);
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.run_with_retry(op) => Some(result),
        };

        match result {
            None => {
                stats.record_cancelled();
                debug!(%kind, "transaction cancelled");
                Outcome::Cancelled
            }
            Some((attempts, Ok(()))) => {
                let elapsed = start.elapsed();
                stats.record_committed(elapsed, attempts);
                Outcome::Committed { elapsed, attempts }
            }
            Some((attempts, Err(error))) => {
                let elapsed = start.elapsed();
                stats.record_failed(elapsed, attempts);
                error!(%kind, step = %error.step, attempts, "transaction failed: {}", error);
                Outcome::Failed {
                    elapsed,
                    attempts,
                    error,
                }
            }
        }
    }

    async fn run_with_retry(&self, op: &dyn Operation) -> (u32, Result<(), OpError>) {
        let mut attempt = 1;
        loop {
            match self.attempt(op).await {
                Ok(()) => return (attempt, Ok(())),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    debug!(
                        kind = %op.kind(),
                        attempt,
                        ?backoff,
                        "retrying after conflict: {}",
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            kind = %op.kind(),
                            attempts = attempt,
                            "retries exhausted"
                        );
                    }
                    return (attempt, Err(e));
                }
            }
        }
    }

    async fn attempt(&self, op: &dyn Operation) -> Result<(), OpError> {
        let mut tx = self.store.begin(self.isolation).await.step(Step::Begin)?;

        match op.apply(tx.as_mut()).await {
            Ok(()) => tx.commit().await.step(Step::Commit),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!("rollback after failed {} step: {}", e.step, rollback);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use crate::stats::OpKind;
    use crate::store::{Table, Transaction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a conflict for the first `conflicts` attempts.
    struct Flaky {
        conflicts: u32,
        calls: AtomicU32,
        retryable: bool,
    }

    impl Flaky {
        fn new(conflicts: u32, retryable: bool) -> Self {
            Self {
                conflicts,
                calls: AtomicU32::new(0),
                retryable,
            }
        }
    }

    #[async_trait]
    impl Operation for Flaky {
        fn kind(&self) -> OpKind {
            OpKind::Write
        }

        async fn apply(&self, _tx: &mut dyn Transaction) -> Result<(), OpError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.conflicts {
                let source = if self.retryable {
                    StoreError::Conflict("could not serialize access".into())
                } else {
                    StoreError::backend("relation does not exist")
                };
                return Err(OpError::new(Step::UpdateProduct, source));
            }
            Ok(())
        }
    }

    struct Hang;

    #[async_trait]
    impl Operation for Hang {
        fn kind(&self) -> OpKind {
            OpKind::Transfer
        }

        async fn apply(&self, _tx: &mut dyn Transaction) -> Result<(), OpError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn executor(retry: RetryPolicy) -> TransactionExecutor {
        let store = MemoryStore::new();
        store.create_table(Table::Product).await.unwrap();
        TransactionExecutor::new(
            Arc::new(store),
            IsolationLevel::Serializable,
            retry,
            Arc::new(RunStats::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_are_retried() {
        let executor = executor(RetryPolicy::default()).await;
        let op = Flaky::new(3, true);

        let outcome = executor.execute(&op, &CancellationToken::new()).await;

        assert!(matches!(outcome, Outcome::Committed { attempts: 4, .. }));
        let stats = executor.stats().kind(OpKind::Write);
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.retries(), 3);
        assert_eq!(stats.latencies().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_is_reported_as_failure() {
        let retry = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let executor = executor(retry).await;
        let op = Flaky::new(10, true);

        let outcome = executor.execute(&op, &CancellationToken::new()).await;

        match outcome {
            Outcome::Failed { attempts, error, .. } => {
                assert_eq!(attempts, 2);
                assert!(error.is_retryable());
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(op.calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.stats().kind(OpKind::Write).failed(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_first_time() {
        let executor = executor(RetryPolicy::default()).await;
        let op = Flaky::new(1, false);

        let outcome = executor.execute(&op, &CancellationToken::new()).await;

        match outcome {
            Outcome::Failed {
                attempts, error, ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(error.step, Step::UpdateProduct);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(op.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_failure() {
        let executor = executor(RetryPolicy::default()).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = executor.execute(&Hang, &cancel).await;

        assert!(matches!(outcome, Outcome::Cancelled));
        let stats = executor.stats().kind(OpKind::Transfer);
        assert_eq!(stats.cancelled(), 1);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.latencies().count(), 0);
    }
}
