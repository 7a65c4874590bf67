/// Errors raised while decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Malformed {kind} frame: {frame}")]
    MalformedFrame { kind: &'static str, frame: String },
}

/// Errors reported by an external collaborator store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Directory backend error: {0}")]
    Backend(String),
}
