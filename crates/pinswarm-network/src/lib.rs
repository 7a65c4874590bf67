//! pinswarm network - provider connections and request correlation
//!
//! Tracks which provider agents are connected, turns the line-oriented duplex
//! channel of each connection into awaitable ping/pin/unpin requests, and runs
//! the heartbeat, watchdog and fold loops that drive uptime accounting.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod liveness;
pub mod registry;

pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use correlator::{send_and_wait, ResponseCorrelator};
pub use error::NetworkError;
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use registry::{ConnectionRegistry, Inbound, OnlineProvider, RegistryConfig};
