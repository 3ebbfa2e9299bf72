//! Request rate limiting.
//!
//! A [`Throttle`] releases at most `rate` permits per window, one every
//! `window / rate`, so load arrives evenly instead of in a burst at the start of
//! each window. Ticks missed while a caller is blocked are skipped rather than
//! replayed.

use crate::error::ConfigError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fixed-rate permit source.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    rate: u64,
    period: Duration,
}

impl Throttle {
    /// Create a throttle granting `rate` permits per `window`.
    pub fn new(rate: u64, window: Duration) -> Result<Self, ConfigError> {
        if rate == 0 {
            return Err(ConfigError::NonPositive { name: "rate" });
        }
        if window.is_zero() {
            return Err(ConfigError::NonPositive {
                name: "rate window",
            });
        }

        let nanos = (window.as_nanos() / u128::from(rate)).max(1);
        let period = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));

        Ok(Self { rate, period })
    }

    /// Create a throttle granting `rate` permits per second.
    pub fn per_second(rate: u64) -> Result<Self, ConfigError> {
        Self::new(rate, Duration::from_secs(1))
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Spacing between consecutive permits.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start a permit stream. The first permit is available immediately.
    pub fn permits(&self) -> Permits {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Permits { ticker }
    }

    /// Invoke `f` once per granted permit until `duration` elapses or `cancel`
    /// fires, awaiting each returned future before the next permit.
    ///
    /// Returns the number of permits granted. No permit is granted once
    /// `cancel` has fired.
    pub async fn run_for<F, Fut>(&self, cancel: &CancellationToken, duration: Duration, mut f: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut permits = self.permits();
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut granted = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut deadline => break,
                _ = permits.ticker.tick() => {}
            }

            granted += 1;
            f().await;
        }

        granted
    }
}

/// Stream of permits produced by [`Throttle::permits`].
#[derive(Debug)]
pub struct Permits {
    ticker: Interval,
}

impl Permits {
    /// Wait for the next permit. Returns `false`, without granting a permit,
    /// if `cancel` fires first.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.ticker.tick() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_zero_rate_rejected() {
        assert_eq!(
            Throttle::per_second(0).unwrap_err(),
            ConfigError::NonPositive { name: "rate" }
        );
        assert!(Throttle::new(10, Duration::ZERO).is_err());
    }

    #[test]
    fn test_period_spreads_permits() {
        let throttle = Throttle::per_second(100).unwrap();
        assert_eq!(throttle.period(), Duration::from_millis(10));

        let fast = Throttle::new(u64::MAX, Duration::from_secs(1)).unwrap();
        assert_eq!(fast.period(), Duration::from_nanos(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_grants_rate_times_duration() {
        let throttle = Throttle::per_second(100).unwrap();
        let cancel = CancellationToken::new();
        let mut calls = 0u64;

        let granted = throttle
            .run_for(&cancel, Duration::from_secs(2), || {
                calls += 1;
                async {}
            })
            .await;

        assert_eq!(granted, calls);
        let expected = 200.0;
        let deviation = (granted as f64 - expected).abs() / expected;
        assert!(deviation <= 0.05, "granted {granted} permits, expected ~200");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permits_are_not_bursty() {
        let throttle = Throttle::per_second(10).unwrap();
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let mut stamps = Vec::new();

        throttle
            .run_for(&cancel, Duration::from_secs(1), || {
                stamps.push(start.elapsed());
                async {}
            })
            .await;

        assert_eq!(stamps.len(), 10);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_permit_after_cancellation() {
        let throttle = Throttle::per_second(100).unwrap();
        let cancel = CancellationToken::new();
        let after_cancel = Arc::new(AtomicBool::new(false));

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(505)).await;
                cancel.cancel();
            })
        };

        let granted = throttle
            .run_for(&cancel, Duration::from_secs(10), || {
                if cancel.is_cancelled() {
                    after_cancel.store(true, Ordering::SeqCst);
                }
                async {}
            })
            .await;

        canceller.await.unwrap();
        assert!(!after_cancel.load(Ordering::SeqCst));
        assert!((50..=52).contains(&granted), "granted {granted}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_returns_false_when_cancelled() {
        let throttle = Throttle::per_second(1).unwrap();
        let cancel = CancellationToken::new();
        let mut permits = throttle.permits();

        assert!(permits.acquire(&cancel).await);

        cancel.cancel();
        assert!(!permits.acquire(&cancel).await);
    }
}
