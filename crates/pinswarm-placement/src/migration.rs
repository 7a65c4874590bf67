//! Replication repair when a provider leaves a swarm.
//!
//! Unlike upload placement this is a background task, so each affected file
//! is offered to one replacement at a time in RTT order and the first
//! acceptance wins. A file nobody accepts stays at reduced replication and
//! is reported as skipped; the migration itself always completes.

use std::time::Duration;

use serde::Serialize;

use pinswarm_protocol::{Cid, FileCatalog, FileId, FileRecord, SwarmId, UserId};

use crate::placement::delete_owned;
use crate::selector::ProviderSelector;
use crate::PlacementError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigratedFile {
    pub file_id: FileId,
    pub cid: Cid,
    pub new_holder: UserId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub migrated: Vec<MigratedFile>,
    /// CIDs left without a replacement holder.
    pub skipped: Vec<Cid>,
    /// Files owned by the leaver that were deleted.
    pub deleted_owned: usize,
}

pub struct DepartureMigrator<'a> {
    selector: &'a ProviderSelector,
    catalog: &'a dyn FileCatalog,
    pin_timeout: Duration,
    unpin_timeout: Duration,
}

impl<'a> DepartureMigrator<'a> {
    pub fn new(
        selector: &'a ProviderSelector,
        catalog: &'a dyn FileCatalog,
        pin_timeout: Duration,
        unpin_timeout: Duration,
    ) -> Self {
        Self {
            selector,
            catalog,
            pin_timeout,
            unpin_timeout,
        }
    }

    pub async fn migrate(
        &self,
        leaver: &UserId,
        swarm_id: &SwarmId,
    ) -> Result<MigrationReport, PlacementError> {
        let held = self.catalog.files_held_by(leaver, swarm_id).await?;
        // Drop the leaver everywhere before any repair attempt.
        for record in &held {
            self.catalog.remove_holder(&record.id, leaver).await?;
        }

        let mut report = MigrationReport::default();
        for record in &held {
            match self.relocate(record, leaver, swarm_id).await? {
                Some(new_holder) => report.migrated.push(MigratedFile {
                    file_id: record.id.clone(),
                    cid: record.cid.clone(),
                    new_holder,
                }),
                None => {
                    tracing::warn!(
                        file_id = %record.id,
                        cid = %record.cid,
                        swarm_id = %swarm_id,
                        "No replacement holder accepted; file left at reduced replication"
                    );
                    report.skipped.push(record.cid.clone());
                }
            }
        }

        report.deleted_owned = delete_owned(
            self.selector.registry(),
            self.catalog,
            leaver,
            swarm_id,
            self.unpin_timeout,
        )
        .await?;

        tracing::info!(
            user_id = %leaver,
            swarm_id = %swarm_id,
            migrated = report.migrated.len(),
            skipped = report.skipped.len(),
            deleted_owned = report.deleted_owned,
            "Provider departure migrated"
        );
        Ok(report)
    }

    /// Pin `record` to the fastest willing provider that does not hold it.
    async fn relocate(
        &self,
        record: &FileRecord,
        leaver: &UserId,
        swarm_id: &SwarmId,
    ) -> Result<Option<UserId>, PlacementError> {
        let registry = self.selector.registry();
        let online = registry.online_providers_for_swarm(swarm_id).await?;

        let mut ranked = Vec::new();
        for provider in online {
            if &provider.user_id == leaver || record.is_held_by(&provider.user_id) {
                continue;
            }
            let rtt = self.selector.rtt_or_probe(&provider).await;
            ranked.push((rtt, provider));
        }
        ranked.sort_by_key(|(rtt, _)| *rtt);

        for (_, provider) in ranked {
            match registry.pin(&provider.connection, &record.cid, self.pin_timeout).await {
                Ok(true) => {
                    self.catalog.append_holder(&record.id, &provider.user_id).await?;
                    tracing::debug!(
                        cid = %record.cid,
                        user_id = %provider.user_id,
                        "Replacement holder accepted"
                    );
                    return Ok(Some(provider.user_id));
                }
                Ok(false) => tracing::debug!(
                    cid = %record.cid,
                    user_id = %provider.user_id,
                    "Replacement candidate refused"
                ),
                Err(e) => tracing::warn!(
                    cid = %record.cid,
                    user_id = %provider.user_id,
                    error = %e,
                    "Replacement pin failed"
                ),
            }
        }
        Ok(None)
    }
}
