//! pinswarm protocol - core types and wire frames
//!
//! Defines the identifiers shared by every pinswarm crate, the line-oriented
//! text frames exchanged with provider agents, and the interfaces of the
//! external collaborators (identity, membership and file metadata stores)
//! that the coordination core consumes.

pub mod constants;
pub mod directory;
pub mod error;
pub mod frame;
pub mod types;

pub use constants::*;
pub use directory::*;
pub use error::*;
pub use frame::*;
pub use types::*;
