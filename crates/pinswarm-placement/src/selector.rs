//! Provider scoring and candidate selection.
//!
//! Candidates are the online providers of a swarm that can still fit the
//! requested size. Each is scored as
//!
//! ```text
//! 0.4 * uptime + 0.4 * space + 0.2 * (1000 / max(1, rtt_ms))
//! ```
//!
//! where `space` is 1 for an unlimited quota and otherwise the fraction of
//! `max(quota, required)` still free. Reliability history is not tracked
//! yet, so `uptime` is always 1.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;

use pinswarm_network::{ConnectionHandle, ConnectionRegistry, OnlineProvider};
use pinswarm_protocol::constants::FALLBACK_RTT_MS;
use pinswarm_protocol::{Capacity, FileCatalog, MembershipDirectory, PeerId, SwarmId, UserId};

use crate::PlacementError;

const UPTIME_WEIGHT: f64 = 0.4;
const SPACE_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.2;
const DEFAULT_UPTIME_FACTOR: f64 = 1.0;

/// A scored replication target.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub user_id: UserId,
    pub peer_id: PeerId,
    pub connection: ConnectionHandle,
    pub quota_bytes: Option<u64>,
    pub available: Capacity,
    pub rtt_ms: u64,
    pub score: f64,
}

/// Composite placement score of one provider.
pub fn score(
    available: Capacity,
    quota_bytes: Option<u64>,
    required_bytes: u64,
    rtt_ms: u64,
    uptime_factor: f64,
) -> f64 {
    let space = match available {
        Capacity::Unlimited => 1.0,
        Capacity::Bytes(free) => {
            let denominator = quota_bytes.unwrap_or(0).max(required_bytes).max(1);
            free as f64 / denominator as f64
        }
    };
    UPTIME_WEIGHT * uptime_factor
        + SPACE_WEIGHT * space
        + LATENCY_WEIGHT * (1000.0 / rtt_ms.max(1) as f64)
}

/// Best first: higher score, then lower RTT, then more free space.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.rtt_ms.cmp(&b.rtt_ms))
        .then_with(|| b.available.cmp(&a.available))
}

pub struct ProviderSelector {
    registry: Arc<ConnectionRegistry>,
    memberships: Arc<dyn MembershipDirectory>,
    catalog: Arc<dyn FileCatalog>,
}

impl ProviderSelector {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        memberships: Arc<dyn MembershipDirectory>,
        catalog: Arc<dyn FileCatalog>,
    ) -> Self {
        Self {
            registry,
            memberships,
            catalog,
        }
    }

    /// Rank the online providers of `swarm_id` that can hold
    /// `required_bytes`, skipping `exclude`, and return the best `count`.
    pub async fn select_candidates(
        &self,
        swarm_id: &SwarmId,
        required_bytes: u64,
        exclude: &BTreeSet<UserId>,
        count: usize,
    ) -> Result<Vec<Candidate>, PlacementError> {
        let online = self.registry.online_providers_for_swarm(swarm_id).await?;

        let mut fitting = Vec::new();
        for provider in online.into_iter().filter(|p| !exclude.contains(&p.user_id)) {
            let quota_bytes = self
                .memberships
                .memberships_of(&provider.user_id)
                .await?
                .into_iter()
                .find(|m| m.is_provider_in(swarm_id))
                .and_then(|m| m.quota_bytes);
            let used = self.catalog.used_bytes(&provider.user_id, swarm_id).await?;
            let available = Capacity::remaining(quota_bytes, used);
            if !available.fits(required_bytes) {
                tracing::debug!(
                    user_id = %provider.user_id,
                    ?available,
                    required_bytes,
                    "Provider lacks capacity; skipped"
                );
                continue;
            }
            fitting.push((provider, quota_bytes, available));
        }

        let rtts = join_all(fitting.iter().map(|(p, _, _)| self.rtt_or_probe(p))).await;

        let mut candidates: Vec<Candidate> = fitting
            .into_iter()
            .zip(rtts)
            .map(|((provider, quota_bytes, available), rtt_ms)| Candidate {
                score: score(available, quota_bytes, required_bytes, rtt_ms, DEFAULT_UPTIME_FACTOR),
                user_id: provider.user_id,
                peer_id: provider.peer_id,
                connection: provider.connection,
                quota_bytes,
                available,
                rtt_ms,
            })
            .collect();
        candidates.sort_by(rank);
        candidates.truncate(count);

        if candidates.is_empty() {
            return Err(PlacementError::NoProvidersAvailable {
                swarm_id: swarm_id.clone(),
                required_bytes,
            });
        }
        tracing::debug!(
            swarm_id = %swarm_id,
            required_bytes,
            selected = candidates.len(),
            "Selected replication candidates"
        );
        Ok(candidates)
    }

    /// Cached RTT average, or a fresh probe. A failed probe counts as
    /// [`FALLBACK_RTT_MS`].
    pub async fn rtt_or_probe(&self, provider: &OnlineProvider) -> u64 {
        if let Some(rtt) = provider.avg_rtt_ms {
            return rtt;
        }
        match self.registry.measure_rtt(&provider.connection).await {
            Ok(rtt) => rtt,
            Err(e) => {
                tracing::warn!(
                    user_id = %provider.user_id,
                    peer_id = %provider.peer_id,
                    error = %e,
                    "RTT probe failed; using fallback"
                );
                FALLBACK_RTT_MS
            }
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1 << 30;

    #[test]
    fn test_unlimited_quota_scores_full_space() {
        let s = score(Capacity::Unlimited, None, GB, 1000, 1.0);
        assert!((s - (0.4 + 0.4 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_space_score_uses_larger_of_quota_and_required() {
        // 8 of 10 GB free.
        let s = score(Capacity::Bytes(8 * GB), Some(10 * GB), GB, 1000, 1.0);
        assert!((s - (0.4 + 0.4 * 0.8 + 0.2)).abs() < 1e-9);

        // A zero quota must not divide by zero.
        let s = score(Capacity::Bytes(0), Some(0), 0, 1000, 1.0);
        assert!((s - (0.4 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_latency_dominates_for_fast_providers() {
        let fast = score(Capacity::Bytes(GB), Some(10 * GB), GB, 10, 1.0);
        let slow_unlimited = score(Capacity::Unlimited, None, GB, FALLBACK_RTT_MS, 1.0);
        assert!(fast > slow_unlimited);
    }

    #[test]
    fn test_zero_rtt_is_clamped() {
        assert_eq!(
            score(Capacity::Unlimited, None, 0, 0, 1.0),
            score(Capacity::Unlimited, None, 0, 1, 1.0)
        );
    }
}
