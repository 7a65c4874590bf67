//! Connection registry: stable peer identity to live connection.
//!
//! Holds at most one live [`PeerEntry`] per peer id and routes every inbound
//! frame of a connection: identity announcement, liveness refresh, inventory
//! capture and finally the connection's [`ResponseCorrelator`].
//!
//! Re-registering a peer id on a new connection supersedes the old one. The
//! old connection is left open but inert: its traffic is ignored and its
//! close does not touch the live entry.
//!
//! [`ResponseCorrelator`]: crate::correlator::ResponseCorrelator

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use pinswarm_protocol::constants::{RTT_EMA_WEIGHT, RTT_PROBE_TIMEOUT_SECS};
use pinswarm_protocol::{
    Cid, Frame, IdentityDirectory, MembershipDirectory, PeerId, RequestKind, Role, SwarmId, UserId,
};
use pinswarm_state::UptimeTracker;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::correlator::send_and_wait;
use crate::NetworkError;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub rtt_probe_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rtt_probe_timeout: Duration::from_secs(RTT_PROBE_TIMEOUT_SECS),
        }
    }
}

/// The live connection of one peer id plus cached liveness metadata.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub connection: ConnectionHandle,
    pub last_seen: DateTime<Utc>,
    /// Exponential moving average of probe round trips. `None` until the
    /// first successful probe.
    pub avg_rtt_ms: Option<u64>,
    /// Swarms where the user held the provider role at registration.
    pub provider_swarms: Vec<SwarmId>,
    /// Pinned set from the most recent `cids|` reply.
    pub inventory: Option<Vec<Cid>>,
}

/// A provider with a live connection, as returned for candidate selection.
#[derive(Debug, Clone)]
pub struct OnlineProvider {
    pub user_id: UserId,
    pub peer_id: PeerId,
    pub connection: ConnectionHandle,
    pub avg_rtt_ms: Option<u64>,
}

/// What [`ConnectionRegistry::handle_inbound`] did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `id|` accepted; the connection now belongs to this user.
    Registered(UserId),
    /// Consumed as a heartbeat echo or by a pending request.
    Handled,
    /// Nobody was waiting for it.
    Unmatched(Frame),
    /// Dropped: unparseable, sent before identification, or sent on a
    /// superseded connection.
    Ignored,
}

pub struct ConnectionRegistry {
    peers: DashMap<PeerId, PeerEntry>,
    users: DashMap<UserId, PeerId>,
    identities: Arc<dyn IdentityDirectory>,
    memberships: Arc<dyn MembershipDirectory>,
    uptime: Arc<UptimeTracker>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(
        identities: Arc<dyn IdentityDirectory>,
        memberships: Arc<dyn MembershipDirectory>,
        uptime: Arc<UptimeTracker>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            peers: DashMap::new(),
            users: DashMap::new(),
            identities,
            memberships,
            uptime,
            config,
        }
    }

    pub fn uptime(&self) -> &Arc<UptimeTracker> {
        &self.uptime
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Bind `conn` to `peer_id` and mark the owning user online.
    pub async fn register_peer(
        &self,
        conn: &ConnectionHandle,
        peer_id: PeerId,
    ) -> Result<UserId, NetworkError> {
        if let Some(existing) = conn.peer_id() {
            return Err(NetworkError::AlreadyRegistered(existing.clone()));
        }

        let user_id = self
            .identities
            .lookup_identity_by_peer_id(&peer_id)
            .await?
            .ok_or_else(|| NetworkError::UnknownPeer(peer_id.clone()))?;

        let provider_swarms: Vec<SwarmId> = self
            .memberships
            .memberships_of(&user_id)
            .await?
            .into_iter()
            .filter(|m| m.role == Role::Provider)
            .map(|m| m.swarm_id)
            .collect();

        if !conn.bind_peer(peer_id.clone()) {
            // Lost a race with a concurrent `id|` on the same connection.
            let bound = conn.peer_id().cloned().unwrap_or_else(|| peer_id.clone());
            return Err(NetworkError::AlreadyRegistered(bound));
        }

        let now = Utc::now();
        let entry = PeerEntry {
            peer_id: peer_id.clone(),
            user_id: user_id.clone(),
            connection: conn.clone(),
            last_seen: now,
            avg_rtt_ms: None,
            provider_swarms: provider_swarms.clone(),
            inventory: None,
        };
        if let Some(old) = self.peers.insert(peer_id.clone(), entry) {
            tracing::info!(
                peer_id = %peer_id,
                old_connection = %old.connection.id(),
                new_connection = %conn.id(),
                "Peer re-registered; superseding previous connection"
            );
        }

        // A user is reachable through one peer id at a time.
        if let Some(previous) = self.users.insert(user_id.clone(), peer_id.clone()) {
            if previous != peer_id {
                self.peers.remove(&previous);
                tracing::info!(
                    user_id = %user_id,
                    old_peer_id = %previous,
                    peer_id = %peer_id,
                    "User moved to a new peer identity"
                );
            }
        }

        self.uptime.mark_online(&user_id, &peer_id, &provider_swarms, now);
        tracing::info!(
            peer_id = %peer_id,
            user_id = %user_id,
            connection = %conn.id(),
            swarms = provider_swarms.len(),
            "Provider registered"
        );
        Ok(user_id)
    }

    /// Connection closed. Removes the entry only if `conn` is still the live
    /// connection of its peer id.
    pub fn deregister(&self, conn: &ConnectionHandle) -> Option<UserId> {
        let peer_id = conn.peer_id()?;
        let (_, entry) = self
            .peers
            .remove_if(peer_id, |_, e| e.connection.id() == conn.id())?;
        self.users.remove_if(&entry.user_id, |_, p| p == peer_id);
        self.uptime.mark_offline(&entry.user_id, Utc::now());
        tracing::info!(
            peer_id = %peer_id,
            user_id = %entry.user_id,
            connection = %conn.id(),
            "Provider disconnected"
        );
        Some(entry.user_id)
    }

    /// The user stopped providing for `swarm_id`. Drops the swarm from the
    /// live entry and closes its uptime interval; the membership itself is
    /// owned by the directory.
    pub fn leave_swarm(&self, user_id: &UserId, swarm_id: &SwarmId) {
        let peer_id = self.users.get(user_id).map(|p| p.value().clone());
        if let Some(peer_id) = peer_id {
            if let Some(mut entry) = self.peers.get_mut(&peer_id) {
                entry.provider_swarms.retain(|s| s != swarm_id);
            }
        }
        self.uptime.leave_swarm(user_id, swarm_id, Utc::now());
        tracing::info!(user_id = %user_id, swarm_id = %swarm_id, "Provider left swarm");
    }

    /// Route one inbound text frame of `conn`.
    ///
    /// Only `UnknownPeer` and `AlreadyRegistered` are returned as errors; the
    /// transport closes the connection on `UnknownPeer`.
    pub async fn handle_inbound(
        &self,
        conn: &ConnectionHandle,
        raw: &str,
    ) -> Result<Inbound, NetworkError> {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection = %conn.id(), error = %e, "Dropping malformed frame");
                return Ok(Inbound::Ignored);
            }
        };

        let Some(peer_id) = conn.peer_id().cloned() else {
            return match frame {
                Frame::Identify(peer_id) => {
                    self.register_peer(conn, peer_id).await.map(Inbound::Registered)
                }
                other => {
                    tracing::debug!(
                        connection = %conn.id(),
                        frame = other.kind_name(),
                        "Frame before identity announcement ignored"
                    );
                    Ok(Inbound::Ignored)
                }
            };
        };

        if let Frame::Identify(_) = frame {
            return Err(NetworkError::AlreadyRegistered(peer_id));
        }

        let now = Utc::now();
        let user_id = {
            let Some(mut entry) = self.live_entry_mut(&peer_id, conn.id()) else {
                tracing::debug!(
                    peer_id = %peer_id,
                    connection = %conn.id(),
                    "Traffic on superseded connection ignored"
                );
                return Ok(Inbound::Ignored);
            };
            entry.last_seen = now;
            if let Frame::Inventory(cids) = &frame {
                entry.inventory = Some(cids.clone());
            }
            entry.user_id.clone()
        };
        self.uptime.record_activity(&user_id, now);

        if let Frame::Heartbeat(_) = frame {
            return Ok(Inbound::Handled);
        }

        match conn.correlator().deliver(frame).await {
            None => Ok(Inbound::Handled),
            Some(unmatched) => {
                tracing::debug!(
                    peer_id = %peer_id,
                    frame = unmatched.kind_name(),
                    "No pending request for frame; dropped"
                );
                Ok(Inbound::Unmatched(unmatched))
            }
        }
    }

    fn live_entry_mut(
        &self,
        peer_id: &PeerId,
        conn_id: ConnectionId,
    ) -> Option<dashmap::mapref::one::RefMut<'_, PeerId, PeerEntry>> {
        self.peers
            .get_mut(peer_id)
            .filter(|e| e.connection.id() == conn_id)
    }

    /// Whether the user currently has a live connection.
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.users
            .get(user_id)
            .map(|peer| self.peers.contains_key(peer.value()))
            .unwrap_or(false)
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<PeerEntry> {
        self.peers.get(peer_id).map(|e| e.clone())
    }

    /// Providers of `swarm_id` with a live connection.
    ///
    /// Roles are read from the membership directory at call time, so a
    /// provider that left the swarm after registering is not returned.
    pub async fn online_providers_for_swarm(
        &self,
        swarm_id: &SwarmId,
    ) -> Result<Vec<OnlineProvider>, NetworkError> {
        let snapshot: Vec<OnlineProvider> = self
            .peers
            .iter()
            .filter(|e| !e.connection.is_closed())
            .map(|e| OnlineProvider {
                user_id: e.user_id.clone(),
                peer_id: e.peer_id.clone(),
                connection: e.connection.clone(),
                avg_rtt_ms: e.avg_rtt_ms,
            })
            .collect();

        let mut providers = Vec::with_capacity(snapshot.len());
        for candidate in snapshot {
            let memberships = self.memberships.memberships_of(&candidate.user_id).await?;
            if memberships.iter().any(|m| m.is_provider_in(swarm_id)) {
                providers.push(candidate);
            }
        }
        Ok(providers)
    }

    /// Probe `conn` with `ping` and fold the round trip into its RTT average.
    ///
    /// The `cids|` reply also refreshes the peer's recorded inventory.
    pub async fn measure_rtt(&self, conn: &ConnectionHandle) -> Result<u64, NetworkError> {
        let started = Instant::now();
        send_and_wait(conn, Frame::Ping, Frame::is_probe_reply, self.config.rtt_probe_timeout)
            .await?;
        let sample = started.elapsed().as_millis() as u64;

        let peer_id = conn.peer_id().ok_or(NetworkError::NotRegistered)?;
        let Some(mut entry) = self.live_entry_mut(peer_id, conn.id()) else {
            return Ok(sample);
        };
        let avg = match entry.avg_rtt_ms {
            None => sample,
            Some(old) => ema(old, sample),
        };
        entry.avg_rtt_ms = Some(avg);
        tracing::debug!(peer_id = %peer_id, sample_ms = sample, avg_ms = avg, "RTT measured");
        Ok(avg)
    }

    /// Cached RTT average of `conn`, if any.
    pub fn cached_rtt(&self, conn: &ConnectionHandle) -> Option<u64> {
        let peer_id = conn.peer_id()?;
        self.peers
            .get(peer_id)
            .filter(|e| e.connection.id() == conn.id())
            .and_then(|e| e.avg_rtt_ms)
    }

    /// Ask the agent to pin `cid`. `Ok(false)` is an explicit refusal.
    pub async fn pin(
        &self,
        conn: &ConnectionHandle,
        cid: &Cid,
        timeout: Duration,
    ) -> Result<bool, NetworkError> {
        request_outcome(conn, RequestKind::Pin, cid, timeout).await
    }

    /// Ask the agent to drop `cid`. `Ok(false)` is an explicit refusal.
    pub async fn unpin(
        &self,
        conn: &ConnectionHandle,
        cid: &Cid,
        timeout: Duration,
    ) -> Result<bool, NetworkError> {
        request_outcome(conn, RequestKind::Unpin, cid, timeout).await
    }

    /// Every live connection, for the heartbeat loop.
    pub fn live_connections(&self) -> Vec<ConnectionHandle> {
        self.peers.iter().map(|e| e.connection.clone()).collect()
    }

    /// Last reported pinned set of the user's live peer.
    pub fn inventory(&self, user_id: &UserId) -> Option<Vec<Cid>> {
        let peer_id = self.users.get(user_id)?.value().clone();
        self.peers.get(&peer_id).and_then(|e| e.inventory.clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

async fn request_outcome(
    conn: &ConnectionHandle,
    kind: RequestKind,
    cid: &Cid,
    timeout: Duration,
) -> Result<bool, NetworkError> {
    let frame = match kind {
        RequestKind::Pin => Frame::Pin(cid.clone()),
        RequestKind::Unpin => Frame::Unpin(cid.clone()),
    };
    let wanted = cid.clone();
    let reply = send_and_wait(
        conn,
        frame,
        move |f| f.outcome_for(kind, &wanted).is_some(),
        timeout,
    )
    .await?;
    Ok(reply.outcome_for(kind, cid) == Some(true))
}

fn ema(old: u64, sample: u64) -> u64 {
    (old as f64 * (1.0 - RTT_EMA_WEIGHT) + sample as f64 * RTT_EMA_WEIGHT).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_weights_new_sample_by_thirty_percent() {
        assert_eq!(ema(100, 200), 130);
        assert_eq!(ema(100, 100), 100);
        assert_eq!(ema(10, 0), 7);
    }
}
