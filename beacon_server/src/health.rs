//! Periodic health reporting to the hosting platform
use alloc::sync::Arc;
use beacon_hosting::HostingAdapter;
use core::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Floor applied to the interval declared by the adapter
pub(crate) const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Background task pinging the hosting platform at the interval declared by the adapter.
///
/// The first ping happens one interval after the task is spawned. A failed ping is logged and the
/// following ones are still sent.
#[derive(Debug)]
pub(crate) struct HealthCheckTask {
    handle: JoinHandle<()>,
}

impl HealthCheckTask {
    pub(crate) fn spawn(adapter: Arc<dyn HostingAdapter>) -> Self {
        let period = adapter
            .health_check_interval()
            .max(MIN_HEALTH_CHECK_INTERVAL);
        debug!(?period, "Starting health checks");
        Self {
            handle: tokio::spawn(health_check_loop(adapter, period)),
        }
    }

    /// Stop the task. Once this returns no further ping will be sent, including pings already in flight.
    pub(crate) async fn cancel(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
        debug!("Health checks stopped");
    }
}

impl Drop for HealthCheckTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn health_check_loop(adapter: Arc<dyn HostingAdapter>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // dropping the set aborts the pings still in flight
    let mut pings = JoinSet::new();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let adapter = adapter.clone();
                pings.spawn(async move { adapter.health_check().await });
            }
            Some(result) = pings.join_next(), if !pings.is_empty() => {
                match result {
                    Ok(Ok(())) => trace!("Health check sent"),
                    Ok(Err(e)) => warn!("Health check failed: {e}"),
                    Err(e) if e.is_panic() => warn!("Health check panicked: {e}"),
                    Err(_) => {}
                }
            }
        }
    }
}
