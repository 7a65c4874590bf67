//! Coordinator configuration, read from a TOML file.
//!
//! Every section and field is optional; missing values fall back to the
//! protocol defaults.
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:3000"
//!
//! [replication]
//! need = 2
//! extra_hedge = 2
//!
//! [directory]
//! seed_path = "directory.toml"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use pinswarm_network::{LivenessConfig, RegistryConfig};
use pinswarm_placement::PlacementConfig;
use pinswarm_protocol::constants::*;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub server: ServerSection,
    pub timeouts: TimeoutSection,
    pub liveness: LivenessSection,
    pub uptime: UptimeSection,
    pub replication: ReplicationSection,
    pub logging: LoggingSection,
    pub directory: DirectorySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: String,
    /// Frames queued per agent connection before sends start failing.
    pub outbound_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            outbound_queue: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub rtt_probe_secs: u64,
    pub pin_secs: u64,
    pub unpin_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            rtt_probe_secs: RTT_PROBE_TIMEOUT_SECS,
            pin_secs: PIN_TIMEOUT_SECS,
            unpin_secs: UNPIN_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSection {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            heartbeat_timeout_secs: HEARTBEAT_TIMEOUT_SECS,
            watchdog_interval_secs: WATCHDOG_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UptimeSection {
    pub fold_interval_secs: u64,
    pub fold_lookback_days: i64,
}

impl Default for UptimeSection {
    fn default() -> Self {
        Self {
            fold_interval_secs: FOLD_INTERVAL_SECS,
            fold_lookback_days: FOLD_LOOKBACK_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSection {
    pub need: usize,
    pub extra_hedge: usize,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            need: DEFAULT_REPLICATION_NEED,
            extra_hedge: DEFAULT_REPLICATION_EXTRA_HEDGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySection {
    /// TOML seed for the in-memory directory.
    pub seed_path: Option<PathBuf>,
}

impl CoordinatorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.replication.need == 0 {
            anyhow::bail!("replication.need must be at least 1");
        }
        if self.server.outbound_queue == 0 {
            anyhow::bail!("server.outbound_queue must be at least 1");
        }
        for (name, secs) in [
            ("liveness.heartbeat_interval_secs", self.liveness.heartbeat_interval_secs),
            ("liveness.heartbeat_timeout_secs", self.liveness.heartbeat_timeout_secs),
            ("liveness.watchdog_interval_secs", self.liveness.watchdog_interval_secs),
            ("uptime.fold_interval_secs", self.uptime.fold_interval_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{name} must be at least 1");
            }
        }
        let lookback = self.uptime.fold_lookback_days;
        if !(1..=i64::from(MAX_UPTIME_WINDOW_DAYS)).contains(&lookback) {
            anyhow::bail!(
                "uptime.fold_lookback_days must be between 1 and {MAX_UPTIME_WINDOW_DAYS}, got {lookback}"
            );
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            rtt_probe_timeout: Duration::from_secs(self.timeouts.rtt_probe_secs),
        }
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            heartbeat_interval: Duration::from_secs(self.liveness.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.liveness.heartbeat_timeout_secs),
            watchdog_interval: Duration::from_secs(self.liveness.watchdog_interval_secs),
            fold_interval: Duration::from_secs(self.uptime.fold_interval_secs),
            fold_lookback_days: self.uptime.fold_lookback_days,
        }
    }

    pub fn placement_config(&self) -> PlacementConfig {
        PlacementConfig {
            need: self.replication.need,
            extra_hedge: self.replication.extra_hedge,
            pin_timeout: Duration::from_secs(self.timeouts.pin_secs),
            unpin_timeout: Duration::from_secs(self.timeouts.unpin_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = CoordinatorConfig::parse("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.timeouts.pin_secs, 180);
        assert_eq!(config.liveness.heartbeat_timeout_secs, 90);
        assert_eq!(config.uptime.fold_interval_secs, 300);
        assert_eq!(config.replication.need, 3);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = CoordinatorConfig::parse("[replication]\nneed = 1\n").unwrap();
        assert_eq!(config.replication.need, 1);
        assert_eq!(config.replication.extra_hedge, 3);
        assert_eq!(config.placement_config().pin_timeout, Duration::from_secs(180));
    }

    #[test]
    fn test_zero_need_is_rejected() {
        assert!(CoordinatorConfig::parse("[replication]\nneed = 0\n").is_err());
    }

    #[test]
    fn test_zero_outbound_queue_is_rejected() {
        assert!(CoordinatorConfig::parse("[server]\noutbound_queue = 0\n").is_err());
    }
}
