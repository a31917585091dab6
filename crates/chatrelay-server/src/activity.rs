use std::sync::Arc;
use std::time::Duration;

use chatrelay::UserStatus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::SessionRegistry;

/// Periodically marks quiet users as inactive. Presence only: connections are
/// never closed from here.
pub struct ActivityMonitor {
    registry: Arc<SessionRegistry>,
    threshold: Duration,
    interval: Duration,
}

impl ActivityMonitor {
    pub fn new(registry: Arc<SessionRegistry>, threshold: Duration, interval: Duration) -> Self {
        Self {
            registry,
            threshold,
            interval,
        }
    }

    /// One pass over the registry. Returns the usernames flipped to inactive.
    pub fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut flipped = Vec::new();
        for session in self.registry.snapshot() {
            if session.user.status == UserStatus::Inactive
                || now.saturating_duration_since(session.user.last_active) <= self.threshold
            {
                continue;
            }
            if self
                .registry
                .mark_inactive_if_idle(session.connection_id, self.threshold, now)
            {
                flipped.push(session.user.username);
            }
        }
        flipped
    }

    /// Sweep every `interval` until shutdown is signalled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for username in self.sweep() {
                        info!(username = %username, "user marked inactive");
                    }
                }
            }
        }
        debug!("activity monitor stopped");
    }

    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }
}
