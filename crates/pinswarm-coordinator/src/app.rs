//! Shared coordinator state handed to every connection and request handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pinswarm_network::{ConnectionRegistry, LivenessMonitor};
use pinswarm_placement::{MigrationReport, PlacementError, PlacementService};
use pinswarm_protocol::{SwarmId, UserId};
use pinswarm_state::{MemoryDirectory, UptimeTracker};

use crate::config::CoordinatorConfig;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<MemoryDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub placement: Arc<PlacementService>,
    pub outbound_queue: usize,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: &CoordinatorConfig, directory: Arc<MemoryDirectory>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            directory.clone(),
            directory.clone(),
            Arc::new(UptimeTracker::new()),
            config.registry_config(),
        ));
        let placement = Arc::new(PlacementService::new(
            registry.clone(),
            directory.clone(),
            directory.clone(),
            config.placement_config(),
        ));
        Self {
            directory,
            registry,
            placement,
            outbound_queue: config.server.outbound_queue,
            started_at: Utc::now(),
        }
    }

    pub fn liveness_monitor(&self, config: &CoordinatorConfig) -> LivenessMonitor {
        LivenessMonitor::new(self.registry.clone(), config.liveness_config())
    }

    /// A provider leaves a swarm: repair replication of what it held, delete
    /// what it owned, then drop the membership and stop its uptime accounting
    /// in that swarm.
    pub async fn leave_swarm(
        &self,
        user_id: &UserId,
        swarm_id: &SwarmId,
    ) -> Result<MigrationReport, PlacementError> {
        let report = self.placement.migrate_departure(user_id, swarm_id).await?;
        self.directory.remove_membership(user_id, swarm_id).await;
        self.registry.leave_swarm(user_id, swarm_id);
        Ok(report)
    }
}
