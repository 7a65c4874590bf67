/// Errors raised by the state crate.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid directory seed: {0}")]
    Parse(#[from] toml::de::Error),
}
