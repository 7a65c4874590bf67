//! Hedged parallel replication.
//!
//! `need + extra_hedge` pins are issued at once, each in its own task with its
//! own timeout. The call returns as soon as `need` providers accepted, or when
//! every attempt has concluded. Stragglers are left running; their outcome is
//! only logged and never changes the result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pinswarm_network::{ConnectionRegistry, NetworkError};
use pinswarm_protocol::{Cid, UserId};

use crate::selector::Candidate;

pub struct ReplicationCoordinator {
    registry: Arc<ConnectionRegistry>,
    pin_timeout: Duration,
}

impl ReplicationCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, pin_timeout: Duration) -> Self {
        Self {
            registry,
            pin_timeout,
        }
    }

    /// Pin `cid` to the first `need + extra_hedge` candidates and return the
    /// providers that accepted, in completion order, at most `need` of them.
    ///
    /// An empty result means every attempt failed or timed out.
    pub async fn replicate(
        &self,
        cid: &Cid,
        candidates: &[Candidate],
        need: usize,
        extra_hedge: usize,
    ) -> Vec<UserId> {
        let need = need.max(1);
        let mut attempted: Vec<&Candidate> = Vec::new();
        for candidate in candidates {
            if attempted.len() == need + extra_hedge {
                break;
            }
            if !attempted.iter().any(|c| c.user_id == candidate.user_id) {
                attempted.push(candidate);
            }
        }

        let (tx, mut rx) =
            mpsc::channel::<(UserId, Result<bool, NetworkError>)>(attempted.len().max(1));
        for candidate in &attempted {
            let registry = self.registry.clone();
            let conn = candidate.connection.clone();
            let user_id = candidate.user_id.clone();
            let cid = cid.clone();
            let timeout = self.pin_timeout;
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = registry.pin(&conn, &cid, timeout).await;
                let _ = tx.send((user_id, outcome)).await;
            });
        }
        drop(tx);

        let mut accepted: Vec<UserId> = Vec::with_capacity(need);
        while let Some((user_id, outcome)) = rx.recv().await {
            match outcome {
                Ok(true) => {
                    tracing::debug!(cid = %cid, user_id = %user_id, "Provider accepted pin");
                    if !accepted.contains(&user_id) {
                        accepted.push(user_id);
                    }
                    if accepted.len() >= need {
                        break;
                    }
                }
                Ok(false) => {
                    tracing::warn!(cid = %cid, user_id = %user_id, "Provider refused pin");
                }
                Err(e) => {
                    tracing::warn!(cid = %cid, user_id = %user_id, error = %e, "Pin attempt failed");
                }
            }
        }

        let cid_owned = cid.clone();
        tokio::spawn(async move {
            while let Some((user_id, outcome)) = rx.recv().await {
                tracing::debug!(
                    cid = %cid_owned,
                    user_id = %user_id,
                    accepted = matches!(outcome, Ok(true)),
                    "Straggler pin concluded after quorum"
                );
            }
        });

        tracing::info!(
            cid = %cid,
            attempted = attempted.len(),
            accepted = accepted.len(),
            need,
            "Replication finished"
        );
        accepted
    }
}
