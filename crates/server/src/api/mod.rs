pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod stats;
pub mod ws;

pub use routes::create_router;
