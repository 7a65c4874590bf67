//! pinswarm placement - where content lives
//!
//! Ranks online providers for a swarm, replicates new content with a hedged
//! parallel fan-out, repairs replication when a provider leaves a swarm, and
//! removes content on deletion.

pub mod error;
pub mod migration;
pub mod placement;
pub mod replication;
pub mod selector;

pub use error::PlacementError;
pub use migration::{DepartureMigrator, MigratedFile, MigrationReport};
pub use placement::{NewFile, PlacementConfig, PlacementOutcome, PlacementService, QuotaUsage};
pub use replication::ReplicationCoordinator;
pub use selector::{score, Candidate, ProviderSelector};
