//! In-memory implementation of the collaborator interfaces.
//!
//! Backs the coordinator binary when no external store is wired in, and the
//! test suites of the other crates. It can be seeded from a TOML file:
//!
//! ```toml
//! [[users]]
//! user_id = "alice"
//! peer_id = "12D3KooWalice"
//!
//! [[users.memberships]]
//! swarm_id = "lab"
//! role = "provider"
//! quota_bytes = 10737418240
//! ```

use std::collections::HashMap;
use std::path::Path;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use pinswarm_protocol::{
    Cid, DirectoryError, DirectoryResult, FileCatalog, FileId, FileRecord, IdentityDirectory,
    Membership, MembershipDirectory, PeerId, SwarmId, UserId,
};

use crate::StateError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub user_id: UserId,
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    peers: HashMap<PeerId, UserId>,
    memberships: HashMap<UserId, Vec<Membership>>,
    files: HashMap<FileId, FileRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let mut state = DirectoryState::default();
        for user in seed.users {
            if let Some(peer_id) = user.peer_id {
                state.peers.insert(peer_id, user.user_id.clone());
            }
            state.memberships.insert(user.user_id, user.memberships);
        }
        for file in seed.files {
            state.files.insert(file.id.clone(), file);
        }
        Self {
            inner: RwLock::new(state),
        }
    }

    /// Load a TOML seed file.
    pub fn load_seed(path: &Path) -> Result<Self, StateError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: DirectorySeed = toml::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            users = seed.users.len(),
            files = seed.files.len(),
            "Loaded directory seed"
        );
        Ok(Self::from_seed(seed))
    }

    /// Bind `peer_id` to `user_id`. A user has at most one peer identity, so
    /// any previous claim by the same user is released.
    pub async fn claim_peer(&self, user_id: UserId, peer_id: PeerId) {
        let mut state = self.inner.write().await;
        state.peers.retain(|_, owner| owner != &user_id);
        state.peers.insert(peer_id, user_id);
    }

    /// Insert or replace the membership of `user_id` in `membership.swarm_id`.
    pub async fn upsert_membership(&self, user_id: UserId, membership: Membership) {
        let mut state = self.inner.write().await;
        let list = state.memberships.entry(user_id).or_default();
        list.retain(|m| m.swarm_id != membership.swarm_id);
        list.push(membership);
    }

    pub async fn remove_membership(&self, user_id: &UserId, swarm_id: &SwarmId) {
        let mut state = self.inner.write().await;
        if let Some(list) = state.memberships.get_mut(user_id) {
            list.retain(|m| &m.swarm_id != swarm_id);
        }
    }

    pub async fn files(&self) -> Vec<FileRecord> {
        self.inner.read().await.files.values().cloned().collect()
    }
}

impl IdentityDirectory for MemoryDirectory {
    fn lookup_identity_by_peer_id<'a>(
        &'a self,
        peer_id: &'a PeerId,
    ) -> BoxFuture<'a, DirectoryResult<Option<UserId>>> {
        async move { Ok(self.inner.read().await.peers.get(peer_id).cloned()) }.boxed()
    }
}

impl MembershipDirectory for MemoryDirectory {
    fn memberships_of<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, DirectoryResult<Vec<Membership>>> {
        async move {
            Ok(self
                .inner
                .read()
                .await
                .memberships
                .get(user_id)
                .cloned()
                .unwrap_or_default())
        }
        .boxed()
    }
}

impl FileCatalog for MemoryDirectory {
    fn used_bytes<'a>(
        &'a self,
        user_id: &'a UserId,
        swarm_id: &'a SwarmId,
    ) -> BoxFuture<'a, DirectoryResult<u64>> {
        async move {
            let state = self.inner.read().await;
            Ok(state
                .files
                .values()
                .filter(|f| &f.swarm_id == swarm_id && f.is_held_by(user_id))
                .map(|f| f.size)
                .sum())
        }
        .boxed()
    }

    fn files_held_by<'a>(
        &'a self,
        user_id: &'a UserId,
        swarm_id: &'a SwarmId,
    ) -> BoxFuture<'a, DirectoryResult<Vec<FileRecord>>> {
        async move {
            let state = self.inner.read().await;
            Ok(state
                .files
                .values()
                .filter(|f| &f.swarm_id == swarm_id && f.is_held_by(user_id))
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn files_owned_by<'a>(
        &'a self,
        user_id: &'a UserId,
        swarm_id: &'a SwarmId,
    ) -> BoxFuture<'a, DirectoryResult<Vec<FileRecord>>> {
        async move {
            let state = self.inner.read().await;
            Ok(state
                .files
                .values()
                .filter(|f| &f.swarm_id == swarm_id && &f.owner_id == user_id)
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn file_by_cid<'a>(
        &'a self,
        swarm_id: &'a SwarmId,
        cid: &'a Cid,
    ) -> BoxFuture<'a, DirectoryResult<Option<FileRecord>>> {
        async move {
            let state = self.inner.read().await;
            Ok(state
                .files
                .values()
                .find(|f| &f.swarm_id == swarm_id && &f.cid == cid)
                .cloned())
        }
        .boxed()
    }

    fn get_file<'a>(
        &'a self,
        file_id: &'a FileId,
    ) -> BoxFuture<'a, DirectoryResult<Option<FileRecord>>> {
        async move { Ok(self.inner.read().await.files.get(file_id).cloned()) }.boxed()
    }

    fn insert_file(&self, record: FileRecord) -> BoxFuture<'_, DirectoryResult<()>> {
        async move {
            self.inner.write().await.files.insert(record.id.clone(), record);
            Ok(())
        }
        .boxed()
    }

    fn append_holder<'a>(
        &'a self,
        file_id: &'a FileId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, DirectoryResult<()>> {
        async move {
            let mut state = self.inner.write().await;
            let file = state
                .files
                .get_mut(file_id)
                .ok_or_else(|| DirectoryError::FileNotFound(file_id.to_string()))?;
            file.stored_ids.insert(user_id.clone());
            Ok(())
        }
        .boxed()
    }

    fn remove_holder<'a>(
        &'a self,
        file_id: &'a FileId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, DirectoryResult<()>> {
        async move {
            let mut state = self.inner.write().await;
            let file = state
                .files
                .get_mut(file_id)
                .ok_or_else(|| DirectoryError::FileNotFound(file_id.to_string()))?;
            file.stored_ids.remove(user_id);
            Ok(())
        }
        .boxed()
    }

    fn delete_file<'a>(&'a self, file_id: &'a FileId) -> BoxFuture<'a, DirectoryResult<()>> {
        async move {
            self.inner.write().await.files.remove(file_id);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinswarm_protocol::Role;
    use std::collections::BTreeSet;

    fn record(id: &str, swarm: &str, owner: &str, size: u64, holders: &[&str]) -> FileRecord {
        FileRecord {
            id: FileId::new(id),
            cid: Cid::new(format!("cid-{id}")),
            name: String::new(),
            size,
            swarm_id: SwarmId::new(swarm),
            owner_id: UserId::new(owner),
            stored_ids: holders.iter().map(|h| UserId::new(*h)).collect::<BTreeSet<_>>(),
        }
    }

    #[tokio::test]
    async fn test_used_bytes_counts_only_held_files_in_swarm() {
        let dir = MemoryDirectory::from_seed(DirectorySeed {
            users: vec![],
            files: vec![
                record("f1", "s1", "o", 100, &["p1"]),
                record("f2", "s1", "o", 50, &["p1", "p2"]),
                record("f3", "s2", "o", 1_000, &["p1"]),
            ],
        });
        let used = dir.used_bytes(&UserId::new("p1"), &SwarmId::new("s1")).await.unwrap();
        assert_eq!(used, 150);
        let used = dir.used_bytes(&UserId::new("p2"), &SwarmId::new("s1")).await.unwrap();
        assert_eq!(used, 50);
    }

    #[tokio::test]
    async fn test_append_holder_never_duplicates() {
        let dir = MemoryDirectory::new();
        dir.insert_file(record("f1", "s1", "o", 10, &["p1"])).await.unwrap();
        let id = FileId::new("f1");
        dir.append_holder(&id, &UserId::new("p1")).await.unwrap();
        dir.append_holder(&id, &UserId::new("p2")).await.unwrap();
        let file = dir.get_file(&id).await.unwrap().unwrap();
        assert_eq!(file.stored_ids.len(), 2);

        assert!(matches!(
            dir.append_holder(&FileId::new("missing"), &UserId::new("p1")).await,
            Err(DirectoryError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_peer_replaces_previous_claim() {
        let dir = MemoryDirectory::new();
        let user = UserId::new("alice");
        dir.claim_peer(user.clone(), PeerId::new("old")).await;
        dir.claim_peer(user.clone(), PeerId::new("new")).await;
        assert_eq!(dir.lookup_identity_by_peer_id(&PeerId::new("old")).await.unwrap(), None);
        assert_eq!(
            dir.lookup_identity_by_peer_id(&PeerId::new("new")).await.unwrap(),
            Some(user)
        );
    }

    #[tokio::test]
    async fn test_upsert_membership_replaces_same_swarm() {
        let dir = MemoryDirectory::new();
        let user = UserId::new("alice");
        let swarm = SwarmId::new("s1");
        dir.upsert_membership(
            user.clone(),
            Membership { swarm_id: swarm.clone(), role: Role::Consumer, quota_bytes: None },
        )
        .await;
        dir.upsert_membership(
            user.clone(),
            Membership { swarm_id: swarm.clone(), role: Role::Provider, quota_bytes: Some(5) },
        )
        .await;
        let memberships = dir.memberships_of(&user).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].role, Role::Provider);

        dir.remove_membership(&user, &swarm).await;
        assert!(dir.memberships_of(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_seed_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.toml");
        std::fs::write(
            &path,
            "[[users]]\nuser_id = \"alice\"\npeer_id = \"12D3KooWalice\"\n\n\
             [[users.memberships]]\nswarm_id = \"lab\"\nrole = \"provider\"\n",
        )
        .unwrap();

        let dir = MemoryDirectory::load_seed(&path).unwrap();
        let alice = dir
            .lookup_identity_by_peer_id(&PeerId::new("12D3KooWalice"))
            .await
            .unwrap()
            .unwrap();
        let memberships = dir.memberships_of(&alice).await.unwrap();
        assert!(memberships[0].is_provider_in(&SwarmId::new("lab")));
        assert_eq!(memberships[0].quota_bytes, None);
    }

    #[test]
    fn test_load_seed_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MemoryDirectory::load_seed(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(StateError::Io(_))));
    }
}
