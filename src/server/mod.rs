//! HTTP server
//!
//! [`ServerBuilder`] wires the services into an [`AppState`], mounts the
//! routes under `/api/v1` and runs the background tasks.

pub mod builder;
pub mod gateway;
pub mod routes;
pub mod state;

pub use builder::{REQUEST_ID_HEADER, ServerBuilder, router, spawn_background_tasks};
pub use gateway::GatewayProxy;
pub use state::AppState;
