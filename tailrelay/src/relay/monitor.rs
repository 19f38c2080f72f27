use crate::relay::Supervisor;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically clears PIDs of relays whose process died on its own.
pub struct RelayMonitor {
    supervisor: Arc<Supervisor>,
    interval: Duration,
}

impl RelayMonitor {
    pub fn new(supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        let interval = if interval.is_zero() { DEFAULT_MONITOR_INTERVAL } else { interval };
        Self { supervisor, interval }
    }

    /// Run until `token` is cancelled. A sweep in progress always completes first.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(self, token: CancellationToken) {
        info!("Relay monitor started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the first sweep happens one interval in
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.supervisor.sweep().await {
                Ok(0) => debug!("Relay monitor sweep found nothing to clean"),
                Ok(cleaned) => info!("Relay monitor cleared {} stale PID(s)", cleaned),
                Err(e) => warn!("Relay monitor skipped a tick: {}", e),
            }
        }
        info!("Relay monitor stopped");
    }
}
