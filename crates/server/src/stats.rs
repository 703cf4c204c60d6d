//! Process-wide connection and transfer counters with periodic reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Live counters shared by every session.
///
/// Each counter is updated atomically on its own; a [`StatsSnapshot`] is
/// not a consistent cut across both fields.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    active_connections: AtomicUsize,
    total_bytes: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_connections: usize,
    pub total_bytes_transferred: u64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the active count, never below zero.
    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections(),
            total_bytes_transferred: self.total_bytes(),
        }
    }

    /// Counts a connection as active until the returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.connection_opened();
        ConnectionGuard {
            stats: Arc::clone(self),
        }
    }
}

/// Keeps one connection counted in [`StatsRegistry::active_connections`].
#[derive(Debug)]
pub struct ConnectionGuard {
    stats: Arc<StatsRegistry>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Spawns a task that logs a snapshot every `interval` until `cancel` fires.
pub fn spawn_monitor(
    stats: Arc<StatsRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(monitor_loop(stats, interval, cancel))
}

async fn monitor_loop(stats: Arc<StatsRegistry>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the first immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                tracing::info!(
                    active_connections = snapshot.active_connections,
                    total_bytes = snapshot.total_bytes_transferred,
                    "server stats"
                );
            }
        }
    }
}
