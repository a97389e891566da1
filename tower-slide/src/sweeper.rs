use std::sync::Arc;
use std::time::Duration;

use slide_limit::Limiter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::time::interval;
use tracing::debug;
use tracing::trace;

/// Periodically drop idle requester histories from `limiter`.
///
/// The task holds only a weak reference and exits once the limiter is dropped.
pub fn spawn_sweeper(limiter: &Arc<Limiter>, period: Duration) -> JoinHandle<()> {
    let limiter = Arc::downgrade(limiter);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(limiter) = limiter.upgrade() else {
                debug!("Limiter dropped, stopping sweeper");
                return;
            };
            let evicted = limiter.sweep();
            trace!(evicted, "Sweep tick");
        }
    })
}
