//! HTTP and WebSocket host for the distillery job service.

pub mod api;
pub mod metrics;
pub mod state;

pub use api::create_router;
pub use state::AppState;
