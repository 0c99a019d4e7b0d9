//! Heartbeat scheduler: a fixed-period, cancellable ping timer.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use nodefleet_common::FleetError;

/// What a failed tick does to the node that owns the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingFailurePolicy {
    /// Stop the timer and fail the node, which then restarts
    #[default]
    Restart,
    /// Keep ticking; the failure is only reported
    Tolerate,
}

/// Invokes a tick on a fixed period until cancelled.
///
/// No jitter, no adaptive backoff. Each tick is judged only by its own
/// result. Ticks of one scheduler never overlap: a slow tick delays the
/// next one instead of racing it.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatScheduler {
    period: Duration,
    policy: PingFailurePolicy,
}

impl HeartbeatScheduler {
    pub fn new(period: Duration, policy: PingFailurePolicy) -> Self {
        Self { period, policy }
    }

    /// Run the timer. The first tick fires one full period from now.
    ///
    /// Returns the number of ticks fired once `cancel` triggers, or the
    /// tick's error under [`PingFailurePolicy::Restart`].
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, mut tick: F) -> Result<u64, FleetError>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<(), FleetError>>,
    {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ticks),
                _ = interval.tick() => {}
            }

            ticks += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ticks),
                result = tick(ticks) => result,
            };

            if let Err(e) = result {
                match self.policy {
                    PingFailurePolicy::Restart => return Err(e),
                    PingFailurePolicy::Tolerate => {
                        tracing::debug!(tick = ticks, error = %e, "Heartbeat tick failed, timer kept");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    const PERIOD: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_fixed_period() {
        let scheduler = HeartbeatScheduler::new(PERIOD, PingFailurePolicy::Restart);
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicU64::new(0));

        let task = {
            let cancel = cancel.clone();
            let fired = fired.clone();
            tokio::spawn(async move {
                scheduler
                    .run(&cancel, |_| {
                        let fired = fired.clone();
                        async move {
                            fired.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "first tick waits a full period");

        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_policy_stops_on_failure() {
        let scheduler = HeartbeatScheduler::new(PERIOD, PingFailurePolicy::Restart);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = scheduler
            .run(&cancel, |n| async move {
                if n == 2 {
                    Err(FleetError::Network("connection reset".into()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(FleetError::Network(_))));
        let elapsed = start.elapsed();
        assert!(elapsed >= PERIOD * 2 && elapsed < PERIOD * 3, "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerate_policy_keeps_ticking() {
        let scheduler = HeartbeatScheduler::new(PERIOD, PingFailurePolicy::Tolerate);
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU64::new(0));

        let task = {
            let cancel = cancel.clone();
            let attempts = attempts.clone();
            tokio::spawn(async move {
                scheduler
                    .run(&cancel, |_| {
                        let attempts = attempts.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err(FleetError::Remote {
                                status: 503,
                                body: String::new(),
                            })
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(210)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_slow_tick() {
        let scheduler = HeartbeatScheduler::new(PERIOD, PingFailurePolicy::Restart);
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                scheduler
                    .run(&cancel, |_| async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(90)).await;
        cancel.cancel();

        assert_eq!(tokio_test::assert_ok!(task.await.unwrap()), 1);
    }
}
