//! pinswarm state - uptime accounting and the in-memory directory
//!
//! The uptime tracker owns every online/offline interval and daily bucket.
//! The memory directory implements the identity, membership and file catalog
//! interfaces for deployments without an external store.

pub mod directory;
pub mod error;
pub mod uptime;

pub use directory::{DirectorySeed, MemoryDirectory, SeedUser};
pub use error::StateError;
pub use uptime::{
    split_by_utc_day, DailyBucket, UptimeInterval, UptimeKey, UptimeState, UptimeTotals,
    UptimeTracker,
};
