//! HTTP surface of the plugin: one route per libnetwork method.

mod handlers;
mod routes;

pub use handlers::AppState;
pub use routes::create_router;
