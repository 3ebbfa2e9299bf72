//! Run lifecycle: seed, sample, run the workload loops, drain, report.

use crate::config::{RunConfig, WorkloadConfig};
use crate::error::{ConfigError, RunError};
use crate::executor::TransactionExecutor;
use crate::limiter::{ConcurrencyLimiter, DrainOutcome};
use crate::report::{InvariantCheck, KindSummary, RunSummary};
use crate::stats::{OpKind, Progress, RunStats};
use crate::store::{KeySelection, Store, Table};
use crate::throttle::Throttle;
use crate::workload::{OperationSource, ProductGenerator};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle phase of a run. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Seeding,
    Sampling,
    Running,
    Draining,
    Reporting,
    Terminal,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Seeding => "seeding",
            RunPhase::Sampling => "sampling",
            RunPhase::Running => "running",
            RunPhase::Draining => "draining",
            RunPhase::Reporting => "reporting",
            RunPhase::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Receives live progress while a run is in the `Running` phase.
pub trait RunObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress) {
        info!("{}", progress);
    }
}

/// Observer that reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RunObserver for LogObserver {}

/// Drives one run against a store.
pub struct Orchestrator {
    config: RunConfig,
    store: Arc<dyn Store>,
    observer: Arc<dyn RunObserver>,
    phase: Mutex<RunPhase>,
}

impl Orchestrator {
    /// Validate `config` and bind it to `store`. Nothing touches the store
    /// until [`Orchestrator::run`].
    pub fn new(config: RunConfig, store: Arc<dyn Store>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            observer: Arc::new(LogObserver),
            phase: Mutex::new(RunPhase::Idle),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, to: RunPhase) -> Result<(), RunError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if to <= *phase {
            return Err(RunError::Phase { from: *phase, to });
        }
        info!(from = %*phase, %to, "run phase changed");
        *phase = to;
        Ok(())
    }

    /// Run the workload once.
    ///
    /// Cancelling `interrupt` ends the run early through the same path as the
    /// duration elapsing; the summary is still produced. A run ends in the
    /// `Terminal` phase whether it succeeds or fails and cannot be restarted.
    pub async fn run(&self, interrupt: CancellationToken) -> Result<RunSummary, RunError> {
        let result = self.run_phases(interrupt).await;
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = RunPhase::Terminal;
        result
    }

    /// Drop the account table. The product table is left in place.
    pub async fn teardown(&self) -> Result<(), RunError> {
        if matches!(self.config.workload, WorkloadConfig::Transfer(_)) {
            info!("dropping {} table", Table::Account);
            self.store
                .drop_table(Table::Account)
                .await
                .map_err(RunError::setup("dropping account table"))?;
        }
        Ok(())
    }

    async fn run_phases(&self, interrupt: CancellationToken) -> Result<RunSummary, RunError> {
        self.advance(RunPhase::Seeding)?;
        self.seed().await?;

        self.advance(RunPhase::Sampling)?;
        let keys = self.sample_keys().await?;

        self.advance(RunPhase::Running)?;
        let stats = Arc::new(RunStats::new(self.config.latency_capacity));
        let limiter = ConcurrencyLimiter::new(self.config.concurrency)?;
        let cancel = interrupt.child_token();
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        info!(
            backend = self.store.backend(),
            isolation = %self.config.isolation,
            concurrency = self.config.concurrency,
            sample_size = keys.len(),
            duration = ?self.config.duration,
            "starting workload"
        );

        let loops = self.spawn_loops(&keys, &stats, &limiter, &cancel)?;
        let kinds: Vec<OpKind> = self.config.loop_rates().into_iter().map(|(k, _)| k).collect();
        let reporter = self.spawn_reporter(&kinds, &stats, &cancel, start);

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(self.config.duration) => false,
            _ = cancel.cancelled() => true,
        };
        if interrupted {
            info!("run interrupted");
        }
        cancel.cancel();

        self.advance(RunPhase::Draining)?;
        let drain = self.drain(loops, reporter, &limiter).await;
        let elapsed = start.elapsed();

        self.advance(RunPhase::Reporting)?;
        let invariant = self.verify(&keys).await?;

        let kinds = kinds
            .iter()
            .map(|kind| KindSummary::from_stats(*kind, stats.kind(*kind)))
            .collect();

        Ok(RunSummary {
            backend: self.store.backend().to_string(),
            isolation: self.config.isolation,
            sample_size: keys.len(),
            concurrency: self.config.concurrency,
            target_qps: self.config.target_qps,
            started_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            interrupted,
            kinds,
            invariant,
            drain,
            config: self.config.clone(),
        })
    }

    async fn seed(&self) -> Result<(), RunError> {
        let table = self.table();
        info!("resetting {} table", table);

        self.store
            .drop_table(table)
            .await
            .map_err(RunError::setup("dropping table"))?;
        self.store
            .create_table(table)
            .await
            .map_err(RunError::setup("creating table"))?;

        let inserted = match &self.config.workload {
            WorkloadConfig::Transfer(transfer) => self
                .store
                .seed_accounts(transfer.accounts, transfer.initial_balance)
                .await
                .map_err(RunError::setup("seeding accounts"))?,
            WorkloadConfig::Mixed(mixed) => {
                let products = ProductGenerator::new(self.config.seed).products(mixed.products);
                self.store
                    .seed_products(&products)
                    .await
                    .map_err(RunError::setup("seeding products"))?
            }
        };

        info!("seeded {} rows into {}", inserted, table);
        Ok(())
    }

    async fn sample_keys(&self) -> Result<Arc<[String]>, RunError> {
        let selection = match &self.config.workload {
            WorkloadConfig::Transfer(transfer) => KeySelection::Sample(transfer.selection),
            WorkloadConfig::Mixed(mixed) => mixed
                .selection
                .map(KeySelection::Sample)
                .unwrap_or(KeySelection::All),
        };

        let keys = self
            .store
            .fetch_key_sample(self.table(), selection)
            .await
            .map_err(RunError::setup("fetching key sample"))?;

        let needed = match selection {
            KeySelection::Sample(sample) => sample.max(self.config.required_keys()),
            KeySelection::All => self.config.required_keys(),
        };
        if keys.len() < needed {
            return Err(RunError::InsufficientKeys {
                needed,
                found: keys.len(),
            });
        }

        debug!(keys = keys.len(), "key pool ready");
        Ok(keys.into())
    }

    fn spawn_loops(
        &self,
        keys: &Arc<[String]>,
        stats: &Arc<RunStats>,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
    ) -> Result<JoinSet<(OpKind, u64)>, RunError> {
        let executor = TransactionExecutor::new(
            self.store.clone(),
            self.config.isolation,
            self.config.retry,
            stats.clone(),
        );
        let amount = match &self.config.workload {
            WorkloadConfig::Transfer(transfer) => transfer.amount,
            WorkloadConfig::Mixed(_) => Decimal::ZERO,
        };

        let mut loops = JoinSet::new();
        for (kind, rate) in self.config.loop_rates() {
            let throttle = Throttle::per_second(rate)?;
            let mut source = OperationSource::new(kind, keys.clone(), amount, self.config.seed);
            let executor = executor.clone();
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let duration = self.config.duration;

            debug!(%kind, rate, "starting workload loop");
            loops.spawn(async move {
                let granted = throttle
                    .run_for(&cancel, duration, || {
                        let op = source.next_operation();
                        let executor = executor.clone();
                        let limiter = limiter.clone();
                        let cancel = cancel.clone();
                        async move {
                            let Some(op) = op else { return };
                            let task_cancel = cancel.clone();
                            limiter
                                .run(&cancel, async move {
                                    executor.execute(op.as_ref(), &task_cancel).await;
                                })
                                .await;
                        }
                    })
                    .await;
                (kind, granted)
            });
        }

        Ok(loops)
    }

    fn spawn_reporter(
        &self,
        kinds: &[OpKind],
        stats: &Arc<RunStats>,
        cancel: &CancellationToken,
        start: Instant,
    ) -> tokio::task::JoinHandle<()> {
        let kinds = kinds.to_vec();
        let stats = stats.clone();
        let cancel = cancel.clone();
        let observer = self.observer.clone();
        let period = self.config.status_interval;
        let duration = self.config.duration;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let elapsed = start.elapsed();
                        let remaining = duration.saturating_sub(elapsed);
                        observer.on_progress(&stats.progress(&kinds, elapsed, remaining));
                    }
                }
            }
        })
    }

    async fn drain(
        &self,
        mut loops: JoinSet<(OpKind, u64)>,
        reporter: tokio::task::JoinHandle<()>,
        limiter: &ConcurrencyLimiter,
    ) -> DrainOutcome {
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok((kind, granted)) => debug!(%kind, granted, "workload loop stopped"),
                Err(e) => warn!("workload loop ended abnormally: {}", e),
            }
        }
        if let Err(e) = reporter.await {
            warn!("status reporter ended abnormally: {}", e);
        }

        let outcome = limiter.drain(self.config.drain_timeout).await;
        match outcome {
            DrainOutcome::Drained => info!("all in-flight transactions finished"),
            DrainOutcome::Abandoned { in_flight } => warn!(
                in_flight,
                grace = ?self.config.drain_timeout,
                "drain grace period elapsed with transactions still in flight"
            ),
        }
        outcome
    }

    async fn verify(&self, keys: &[String]) -> Result<Option<InvariantCheck>, RunError> {
        let WorkloadConfig::Transfer(transfer) = &self.config.workload else {
            return Ok(None);
        };

        let actual = self
            .store
            .sum_balances(keys)
            .await
            .map_err(RunError::setup("summing sampled balances"))?;
        let expected = transfer.initial_balance * Decimal::from(keys.len());
        let check = InvariantCheck::new(expected, actual);

        if check.holds {
            info!(%expected, %actual, "conserved total holds");
        } else {
            warn!(
                %expected,
                %actual,
                difference = %check.difference,
                "conserved total diverged"
            );
        }
        Ok(Some(check))
    }

    fn table(&self) -> Table {
        match self.config.workload {
            WorkloadConfig::Transfer(_) => Table::Account,
            WorkloadConfig::Mixed(_) => Table::Product,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("backend", &self.store.backend())
            .field("phase", &self.phase())
            .finish()
    }
}
