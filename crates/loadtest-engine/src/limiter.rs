//! Bounded fire-and-forget task admission.

use crate::error::ConfigError;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of asking the limiter to run a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The task was spawned.
    Scheduled,
    /// Cancellation fired while waiting for a slot; the task was dropped unrun.
    Cancelled,
    /// The limiter has been drained and no longer admits work.
    Closed,
}

/// Result of [`ConcurrencyLimiter::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Every admitted task finished.
    Drained,
    /// The grace period elapsed with tasks still running.
    Abandoned { in_flight: usize },
}

/// Runs at most `capacity` tasks at once.
///
/// `run` waits for a free slot and spawns the task without waiting for it to
/// finish. Each task holds its slot until it completes, so `drain` can
/// acknowledge completion of all admitted work by reclaiming every slot.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    capacity: u32,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::NonPositive {
                name: "concurrency",
            });
        }
        let capacity_u32 = u32::try_from(capacity)
            .ok()
            .filter(|c| (*c as usize) <= Semaphore::MAX_PERMITS)
            .ok_or(ConfigError::TooLarge {
                name: "concurrency",
                value: capacity as u64,
            })?;

        Ok(Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity: capacity_u32,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity().saturating_sub(self.slots.available_permits())
    }

    /// Wait for a slot, then spawn `task` on it.
    pub async fn run<F>(&self, cancel: &CancellationToken, task: F) -> Admission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Admission::Cancelled,
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Admission::Closed,
            },
        };

        tokio::spawn(async move {
            task.await;
            drop(permit);
        });

        Admission::Scheduled
    }

    /// Wait up to `grace` for every admitted task to finish, then stop
    /// admitting new work.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        let outcome =
            match tokio::time::timeout(grace, self.slots.acquire_many(self.capacity)).await {
                Ok(Ok(_all)) => DrainOutcome::Drained,
                Ok(Err(_closed)) => DrainOutcome::Drained,
                Err(_elapsed) => DrainOutcome::Abandoned {
                    in_flight: self.in_flight(),
                },
            };

        self.slots.close();
        debug!(?outcome, "concurrency limiter drained");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ConcurrencyLimiter::new(0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity_under_burst() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let cancel = CancellationToken::new();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let current = current.clone();
            let peak = peak.clone();
            let finished = finished.clone();
            let admission = limiter
                .run(&cancel, async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            assert_eq!(admission, Admission::Scheduled);
        }

        assert_eq!(
            limiter.drain(Duration::from_secs(5)).await,
            DrainOutcome::Drained
        );
        assert_eq!(finished.load(Ordering::SeqCst), 50);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slot_wait_observes_cancellation() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let cancel = CancellationToken::new();
        let release = Arc::new(tokio::sync::Notify::new());

        let blocker = release.clone();
        limiter
            .run(&cancel, async move { blocker.notified().await })
            .await;
        assert_eq!(limiter.in_flight(), 1);

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.run(&cancel, async {}).await })
        };

        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Admission::Cancelled);

        release.notify_one();
        assert_eq!(
            limiter.drain(Duration::from_secs(5)).await,
            DrainOutcome::Drained
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reports_abandoned_tasks() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let cancel = CancellationToken::new();

        limiter
            .run(&cancel, tokio::time::sleep(Duration::from_secs(60)))
            .await;

        let outcome = limiter.drain(Duration::from_secs(1)).await;
        assert_eq!(outcome, DrainOutcome::Abandoned { in_flight: 1 });
        assert_eq!(limiter.run(&cancel, async {}).await, Admission::Closed);
    }
}
