//! Upload placement, deletion and quota reporting.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use pinswarm_network::ConnectionRegistry;
use pinswarm_protocol::constants::{
    DEFAULT_REPLICATION_EXTRA_HEDGE, DEFAULT_REPLICATION_NEED, PIN_TIMEOUT_SECS,
    UNPIN_TIMEOUT_SECS,
};
use pinswarm_protocol::{
    Cid, FileCatalog, FileId, FileRecord, MembershipDirectory, SwarmId, UserId,
};

use crate::migration::{DepartureMigrator, MigrationReport};
use crate::replication::ReplicationCoordinator;
use crate::selector::ProviderSelector;
use crate::PlacementError;

#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Accepted replicas required per upload.
    pub need: usize,
    /// Additional providers asked in parallel to absorb slow responders.
    pub extra_hedge: usize,
    pub pin_timeout: Duration,
    pub unpin_timeout: Duration,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            need: DEFAULT_REPLICATION_NEED,
            extra_hedge: DEFAULT_REPLICATION_EXTRA_HEDGE,
            pin_timeout: Duration::from_secs(PIN_TIMEOUT_SECS),
            unpin_timeout: Duration::from_secs(UNPIN_TIMEOUT_SECS),
        }
    }
}

/// Content that has been uploaded and now needs holders.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub cid: Cid,
    pub size: u64,
    pub swarm_id: SwarmId,
    pub owner_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacementOutcome {
    pub file_id: FileId,
    pub cid: Cid,
    /// Providers that accepted in this call.
    pub new_holders: Vec<UserId>,
    /// Every holder after the merge.
    pub stored_ids: BTreeSet<UserId>,
    /// False when the CID was already known in the swarm.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaUsage {
    pub quota_bytes: Option<u64>,
    pub used_bytes: u64,
    /// `None` for an unlimited quota.
    pub percent_used: Option<f64>,
}

pub struct PlacementService {
    registry: Arc<ConnectionRegistry>,
    memberships: Arc<dyn MembershipDirectory>,
    catalog: Arc<dyn FileCatalog>,
    selector: ProviderSelector,
    replicator: ReplicationCoordinator,
    config: PlacementConfig,
}

impl PlacementService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        memberships: Arc<dyn MembershipDirectory>,
        catalog: Arc<dyn FileCatalog>,
        config: PlacementConfig,
    ) -> Self {
        Self {
            selector: ProviderSelector::new(registry.clone(), memberships.clone(), catalog.clone()),
            replicator: ReplicationCoordinator::new(registry.clone(), config.pin_timeout),
            registry,
            memberships,
            catalog,
            config,
        }
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    pub fn replicator(&self) -> &ReplicationCoordinator {
        &self.replicator
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Select, replicate, then record the holders.
    ///
    /// If the CID is already stored in the swarm its current holders are not
    /// asked again and the new holders are merged into the existing record.
    /// Metadata is left untouched unless at least one provider accepted.
    pub async fn place_file(&self, file: NewFile) -> Result<PlacementOutcome, PlacementError> {
        let existing = self.catalog.file_by_cid(&file.swarm_id, &file.cid).await?;
        let exclude = existing
            .as_ref()
            .map(|f| f.stored_ids.clone())
            .unwrap_or_default();

        let wanted = self.config.need + self.config.extra_hedge;
        let candidates = self
            .selector
            .select_candidates(&file.swarm_id, file.size, &exclude, wanted)
            .await?;
        let accepted = self
            .replicator
            .replicate(&file.cid, &candidates, self.config.need, self.config.extra_hedge)
            .await;
        if accepted.is_empty() {
            return Err(PlacementError::NoProvidersAvailable {
                swarm_id: file.swarm_id,
                required_bytes: file.size,
            });
        }

        let outcome = match existing {
            Some(record) => {
                for user_id in &accepted {
                    self.catalog.append_holder(&record.id, user_id).await?;
                }
                let mut stored_ids = record.stored_ids;
                stored_ids.extend(accepted.iter().cloned());
                PlacementOutcome {
                    file_id: record.id,
                    cid: record.cid,
                    new_holders: accepted,
                    stored_ids,
                    created: false,
                }
            }
            None => {
                let record = FileRecord {
                    id: FileId::generate(),
                    cid: file.cid,
                    name: file.name,
                    size: file.size,
                    swarm_id: file.swarm_id,
                    owner_id: file.owner_id,
                    stored_ids: accepted.iter().cloned().collect(),
                };
                let outcome = PlacementOutcome {
                    file_id: record.id.clone(),
                    cid: record.cid.clone(),
                    new_holders: accepted,
                    stored_ids: record.stored_ids.clone(),
                    created: true,
                };
                self.catalog.insert_file(record).await?;
                outcome
            }
        };

        tracing::info!(
            file_id = %outcome.file_id,
            cid = %outcome.cid,
            holders = outcome.stored_ids.len(),
            created = outcome.created,
            "File placed"
        );
        Ok(outcome)
    }

    /// Unpin the file from every online provider of its swarm, then drop
    /// the record whatever the unpin outcomes.
    pub async fn delete_file(&self, file_id: &FileId) -> Result<(), PlacementError> {
        let record = self
            .catalog
            .get_file(file_id)
            .await?
            .ok_or_else(|| PlacementError::FileNotFound(file_id.clone()))?;
        purge_file(&self.registry, self.catalog.as_ref(), &record, self.config.unpin_timeout).await
    }

    /// Delete every file `owner_id` owns in `swarm_id`. Returns how many.
    pub async fn delete_owned_files(
        &self,
        owner_id: &UserId,
        swarm_id: &SwarmId,
    ) -> Result<usize, PlacementError> {
        delete_owned(
            &self.registry,
            self.catalog.as_ref(),
            owner_id,
            swarm_id,
            self.config.unpin_timeout,
        )
        .await
    }

    /// Repair replication after `leaver` leaves `swarm_id`.
    pub async fn migrate_departure(
        &self,
        leaver: &UserId,
        swarm_id: &SwarmId,
    ) -> Result<MigrationReport, PlacementError> {
        DepartureMigrator::new(
            &self.selector,
            self.catalog.as_ref(),
            self.config.pin_timeout,
            self.config.unpin_timeout,
        )
        .migrate(leaver, swarm_id)
        .await
    }

    /// Quota, bytes held and percentage used by a provider in a swarm.
    pub async fn quota_usage(
        &self,
        user_id: &UserId,
        swarm_id: &SwarmId,
    ) -> Result<QuotaUsage, PlacementError> {
        let membership = self
            .memberships
            .memberships_of(user_id)
            .await?
            .into_iter()
            .find(|m| m.is_provider_in(swarm_id))
            .ok_or_else(|| PlacementError::NotProvider {
                user_id: user_id.clone(),
                swarm_id: swarm_id.clone(),
            })?;
        let used_bytes = self.catalog.used_bytes(user_id, swarm_id).await?;
        let percent_used = membership.quota_bytes.map(|quota| {
            if quota == 0 {
                100.0
            } else {
                used_bytes as f64 * 100.0 / quota as f64
            }
        });
        Ok(QuotaUsage {
            quota_bytes: membership.quota_bytes,
            used_bytes,
            percent_used,
        })
    }
}

/// Best-effort unpin to every online provider of the record's swarm, then
/// remove the record.
pub(crate) async fn purge_file(
    registry: &ConnectionRegistry,
    catalog: &dyn FileCatalog,
    record: &FileRecord,
    timeout: Duration,
) -> Result<(), PlacementError> {
    let providers = registry.online_providers_for_swarm(&record.swarm_id).await?;
    let unpins = providers.iter().map(|p| async move {
        match registry.unpin(&p.connection, &record.cid, timeout).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                cid = %record.cid,
                user_id = %p.user_id,
                "Provider reported unpin failure"
            ),
            Err(e) => tracing::warn!(
                cid = %record.cid,
                user_id = %p.user_id,
                error = %e,
                "Unpin attempt failed"
            ),
        }
    });
    futures::future::join_all(unpins).await;

    catalog.delete_file(&record.id).await?;
    tracing::info!(file_id = %record.id, cid = %record.cid, "File deleted");
    Ok(())
}

pub(crate) async fn delete_owned(
    registry: &ConnectionRegistry,
    catalog: &dyn FileCatalog,
    owner_id: &UserId,
    swarm_id: &SwarmId,
    timeout: Duration,
) -> Result<usize, PlacementError> {
    let owned = catalog.files_owned_by(owner_id, swarm_id).await?;
    for record in &owned {
        purge_file(registry, catalog, record, timeout).await?;
    }
    Ok(owned.len())
}
