use std::time::Duration;

use pinswarm_protocol::{DirectoryError, PeerId};

/// Errors raised by the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The announced peer identity has not been claimed by any user.
    #[error("Unknown peer {0}: not claimed by any user")]
    UnknownPeer(PeerId),

    #[error("Connection already registered as {0}")]
    AlreadyRegistered(PeerId),

    #[error("Connection has not announced an identity")]
    NotRegistered,

    #[error("Timed out after {0:?} waiting for provider response")]
    ResponseTimeout(Duration),

    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}
