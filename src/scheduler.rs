//! Periodic background tasks with cooperative shutdown.
//!
//! A cycle that has started always runs to completion; cancellation is only
//! observed between cycles, so partial snapshots are never published.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run `cycle` every `period` until `shutdown` is cancelled.
///
/// The first cycle runs immediately. Ticks missed while a slow cycle was
/// running are skipped rather than replayed back to back.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = name, period_secs = period.as_secs(), "Starting periodic task");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(task = name, "Running cycle");
                    cycle().await;
                }
            }
        }

        info!(task = name, "Periodic task stopped");
    })
}
