use pinswarm_network::NetworkError;
use pinswarm_protocol::{DirectoryError, FileId, SwarmId, UserId};

/// Errors raised by selection, replication and deletion.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// No candidate fits, or every replication attempt failed.
    #[error("No providers available in swarm {swarm_id} for {required_bytes} bytes")]
    NoProvidersAvailable {
        swarm_id: SwarmId,
        required_bytes: u64,
    },

    #[error("File not found: {0}")]
    FileNotFound(FileId),

    #[error("User {user_id} is not a provider in swarm {swarm_id}")]
    NotProvider { user_id: UserId, swarm_id: SwarmId },

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}
