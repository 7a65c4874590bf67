//! Protocol-wide defaults. Every value here can be overridden through the
//! coordinator configuration.

/// Timeout for a `ping` RTT probe.
pub const RTT_PROBE_TIMEOUT_SECS: u64 = 10;
/// Timeout for a single `pin` request.
pub const PIN_TIMEOUT_SECS: u64 = 180;
/// Timeout for a single `unpin` request.
pub const UNPIN_TIMEOUT_SECS: u64 = 120;

/// How often a `hb|<nonce>` frame is pushed to every live connection.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// Silence after which an identity is forced offline.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 90;
/// How often the watchdog scans for silent identities.
pub const WATCHDOG_INTERVAL_SECS: u64 = 30;

/// How often open uptime intervals are folded into daily buckets.
pub const FOLD_INTERVAL_SECS: u64 = 300;
/// How far back the fold pass may accrue an open interval.
pub const FOLD_LOOKBACK_DAYS: i64 = 30;
/// Upper bound for the fold lookback and for uptime query windows.
pub const MAX_UPTIME_WINDOW_DAYS: u32 = 3_650;

/// Successful pins required for an upload.
pub const DEFAULT_REPLICATION_NEED: usize = 3;
/// Extra candidates pinned concurrently to hedge slow or failing nodes.
pub const DEFAULT_REPLICATION_EXTRA_HEDGE: usize = 3;

/// RTT assumed for a candidate whose probe failed.
pub const FALLBACK_RTT_MS: u64 = 9_999;
/// Weight of the newest sample in the RTT moving average.
pub const RTT_EMA_WEIGHT: f64 = 0.3;

/// Capacity of each connection's outbound frame queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
