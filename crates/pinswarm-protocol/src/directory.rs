//! Interfaces of the external collaborators consumed by the coordination core.
//!
//! Identity claims, swarm memberships and file metadata are owned by a storage
//! collaborator outside this workspace. The core only reads them and appends
//! or prunes holder sets, always by id. Implementations return boxed futures
//! so they can be used behind `Arc<dyn ...>`.

use futures::future::BoxFuture;

use crate::error::DirectoryError;
use crate::types::{Cid, FileId, FileRecord, Membership, PeerId, SwarmId, UserId};

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Resolves the user that claimed a peer identity.
pub trait IdentityDirectory: Send + Sync {
    /// Returns `None` when no user has claimed `peer_id`.
    fn lookup_identity_by_peer_id<'a>(
        &'a self,
        peer_id: &'a PeerId,
    ) -> BoxFuture<'a, DirectoryResult<Option<UserId>>>;
}

/// Read access to swarm memberships.
pub trait MembershipDirectory: Send + Sync {
    fn memberships_of<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, DirectoryResult<Vec<Membership>>>;
}

/// File metadata store.
pub trait FileCatalog: Send + Sync {
    /// Sum of `size` over files in `swarm_id` held by `user_id`.
    fn used_bytes<'a>(
        &'a self,
        user_id: &'a UserId,
        swarm_id: &'a SwarmId,
    ) -> BoxFuture<'a, DirectoryResult<u64>>;

    /// Files in `swarm_id` whose holder set contains `user_id`.
    fn files_held_by<'a>(
        &'a self,
        user_id: &'a UserId,
        swarm_id: &'a SwarmId,
    ) -> BoxFuture<'a, DirectoryResult<Vec<FileRecord>>>;

    /// Files in `swarm_id` owned by `user_id`.
    fn files_owned_by<'a>(
        &'a self,
        user_id: &'a UserId,
        swarm_id: &'a SwarmId,
    ) -> BoxFuture<'a, DirectoryResult<Vec<FileRecord>>>;

    fn file_by_cid<'a>(
        &'a self,
        swarm_id: &'a SwarmId,
        cid: &'a Cid,
    ) -> BoxFuture<'a, DirectoryResult<Option<FileRecord>>>;

    fn get_file<'a>(&'a self, file_id: &'a FileId)
        -> BoxFuture<'a, DirectoryResult<Option<FileRecord>>>;

    fn insert_file(&self, record: FileRecord) -> BoxFuture<'_, DirectoryResult<()>>;

    /// Adds a holder. Adding an existing holder is a no-op.
    fn append_holder<'a>(
        &'a self,
        file_id: &'a FileId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, DirectoryResult<()>>;

    fn remove_holder<'a>(
        &'a self,
        file_id: &'a FileId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, DirectoryResult<()>>;

    fn delete_file<'a>(&'a self, file_id: &'a FileId) -> BoxFuture<'a, DirectoryResult<()>>;
}
