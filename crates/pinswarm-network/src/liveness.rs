//! Periodic heartbeat, watchdog and uptime fold loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use pinswarm_protocol::constants::{
    FOLD_INTERVAL_SECS, FOLD_LOOKBACK_DAYS, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS,
    WATCHDOG_INTERVAL_SECS,
};
use pinswarm_protocol::{Frame, UserId};

use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub heartbeat_interval: Duration,
    /// Silence after which an identity is accounted offline.
    pub heartbeat_timeout: Duration,
    pub watchdog_interval: Duration,
    pub fold_interval: Duration,
    pub fold_lookback_days: i64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
            watchdog_interval: Duration::from_secs(WATCHDOG_INTERVAL_SECS),
            fold_interval: Duration::from_secs(FOLD_INTERVAL_SECS),
            fold_lookback_days: FOLD_LOOKBACK_DAYS,
        }
    }
}

pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, config: LivenessConfig) -> Self {
        Self { registry, config }
    }

    /// Push `hb|<nonce>` to every live connection. Returns how many were queued.
    pub fn send_heartbeats(&self) -> usize {
        let mut sent = 0;
        for conn in self.registry.live_connections() {
            let nonce = uuid::Uuid::new_v4().simple().to_string();
            match conn.send(&Frame::Heartbeat(nonce)) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(
                    connection = %conn.id(),
                    peer_id = ?conn.peer_id(),
                    error = %e,
                    "Failed to send heartbeat"
                ),
            }
        }
        sent
    }

    /// Account silent identities offline.
    pub fn run_watchdog(&self, now: DateTime<Utc>) -> Vec<UserId> {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(HEARTBEAT_TIMEOUT_SECS as i64));
        self.registry.uptime().sweep(now, timeout)
    }

    /// Fold open uptime intervals into daily buckets.
    pub fn run_fold(&self, now: DateTime<Utc>) -> usize {
        self.registry
            .uptime()
            .fold_open(now, chrono::Duration::days(self.config.fold_lookback_days))
    }

    /// Drive all three loops until `shutdown` flips to true or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut watchdog = tokio::time::interval(self.config.watchdog_interval);
        let mut fold = tokio::time::interval(self.config.fold_interval);
        // The first tick of an interval fires immediately.
        heartbeat.tick().await;
        watchdog.tick().await;
        fold.tick().await;

        tracing::info!(
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            timeout_secs = self.config.heartbeat_timeout.as_secs(),
            fold_secs = self.config.fold_interval.as_secs(),
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let sent = self.send_heartbeats();
                    tracing::debug!(sent, "Heartbeats sent");
                }
                _ = watchdog.tick() => {
                    let offline = self.run_watchdog(Utc::now());
                    if !offline.is_empty() {
                        tracing::info!(count = offline.len(), "Watchdog marked providers offline");
                    }
                }
                _ = fold.tick() => {
                    self.run_fold(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Liveness monitor stopped");
    }
}
