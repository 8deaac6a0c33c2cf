use axum::{Router, routing::any};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

/// Routes accept any HTTP method; Docker posts every call.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Plugin
        .route("/Plugin.Activate", any(handlers::activate))
        // Network driver
        .route(
            "/NetworkDriver.GetCapabilities",
            any(handlers::get_capabilities),
        )
        .route("/NetworkDriver.CreateNetwork", any(handlers::create_network))
        .route("/NetworkDriver.DeleteNetwork", any(handlers::delete_network))
        .route(
            "/NetworkDriver.CreateEndpoint",
            any(handlers::create_endpoint),
        )
        .route(
            "/NetworkDriver.DeleteEndpoint",
            any(handlers::delete_endpoint),
        )
        .route(
            "/NetworkDriver.EndpointOperInfo",
            any(handlers::endpoint_oper_info),
        )
        .route("/NetworkDriver.Join", any(handlers::join))
        .route("/NetworkDriver.Leave", any(handlers::leave))
        .route("/NetworkDriver.DiscoverNew", any(handlers::discover_new))
        .route(
            "/NetworkDriver.DiscoverDelete",
            any(handlers::discover_delete),
        )
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            any(handlers::program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            any(handlers::revoke_external_connectivity),
        )
        // IPAM driver
        .route(
            "/IpamDriver.GetCapabilities",
            any(handlers::ipam_get_capabilities),
        )
        .route(
            "/IpamDriver.GetDefaultAddressSpaces",
            any(handlers::ipam_get_default_address_spaces),
        )
        .route("/IpamDriver.RequestPool", any(handlers::ipam_request_pool))
        .route("/IpamDriver.ReleasePool", any(handlers::ipam_release_pool))
        .route(
            "/IpamDriver.RequestAddress",
            any(handlers::ipam_request_address),
        )
        .route(
            "/IpamDriver.ReleaseAddress",
            any(handlers::ipam_release_address),
        )
        .fallback(handlers::unhandled)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
