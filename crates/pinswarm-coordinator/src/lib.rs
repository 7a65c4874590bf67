//! pinswarm coordinator
//!
//! Wires the connection registry, placement service and liveness loops to an
//! axum server: provider agents connect over a WebSocket at `/agent`, and
//! operators drive uploads, deletions and swarm departures through `/api`.

pub mod app;
pub mod config;
pub mod server;

pub use app::AppState;
pub use config::CoordinatorConfig;
pub use server::{router, CoordinatorServer};
