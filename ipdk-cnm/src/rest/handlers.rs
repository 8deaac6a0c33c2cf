use axum::{Json, body::Bytes, extract::State, http::Uri};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::driver::{self, DriverError, NetworkDriver};
use crate::ipam::{self, IpamDriver};
use crate::protocol::{
    ActivateResponse, AddressSpacesResponse, CapabilitiesResponse, CreateEndpointResponse,
    EndpointInfoResponse, IpamCapabilitiesResponse, IpamResponse, JoinResponse,
    RequestAddressResponse, RequestPoolResponse, Response,
};

/// Shared application state
pub struct AppState {
    pub network: Arc<NetworkDriver>,
    pub ipam: IpamDriver,
}

impl AppState {
    pub fn new(network: Arc<NetworkDriver>) -> Self {
        Self {
            network,
            ipam: IpamDriver,
        }
    }
}

/// Decode the body and run a driver operation on the blocking pool.
async fn run<Req, T, F>(state: &AppState, body: &Bytes, op: F) -> driver::Result<T>
where
    Req: DeserializeOwned + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&NetworkDriver, &Req) -> driver::Result<T> + Send + 'static,
{
    let req: Req = serde_json::from_slice(body)?;
    let network = state.network.clone();
    tokio::task::spawn_blocking(move || op(&network, &req))
        .await
        .map_err(|e| DriverError::Internal(e.to_string()))?
}

fn decode_ipam<Req: DeserializeOwned>(body: &Bytes) -> ipam::Result<Req> {
    Ok(serde_json::from_slice(body)?)
}

fn respond(method: &str, result: driver::Result<()>) -> Json<Response> {
    match result {
        Ok(()) => Json(Response::default()),
        Err(e) => {
            warn!(method, error = %e, "Request failed");
            Json(Response::error(e))
        }
    }
}

fn respond_ipam(method: &str, result: ipam::Result<()>) -> Json<IpamResponse> {
    match result {
        Ok(()) => Json(IpamResponse::default()),
        Err(e) => {
            warn!(method, error = %e, "Request failed");
            Json(IpamResponse::error(e))
        }
    }
}

// === Plugin ===

pub async fn activate() -> Json<ActivateResponse> {
    debug!("Plugin activated");
    Json(ActivateResponse {
        implements: vec!["NetworkDriver".to_string(), "IpamDriver".to_string()],
    })
}

/// Any path without a route gets a 200 response carrying an error.
pub async fn unhandled(uri: Uri, body: Bytes) -> Json<Response> {
    let path = uri.path().trim_start_matches('/');
    let body = String::from_utf8_lossy(&body);
    warn!(path, "Unhandled API request");
    Json(Response::error(format!(
        "Unhandled API request {} {}",
        path, body
    )))
}

// === Network driver ===

pub async fn get_capabilities(State(state): State<Arc<AppState>>) -> Json<CapabilitiesResponse> {
    Json(state.network.get_capabilities())
}

pub async fn create_network(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Response> {
    respond(
        "CreateNetwork",
        run(&state, &body, NetworkDriver::create_network).await,
    )
}

pub async fn delete_network(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Response> {
    respond(
        "DeleteNetwork",
        run(&state, &body, NetworkDriver::delete_network).await,
    )
}

pub async fn create_endpoint(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<CreateEndpointResponse> {
    match run(&state, &body, NetworkDriver::create_endpoint).await {
        Ok(_) => Json(CreateEndpointResponse::default()),
        Err(e) => {
            warn!(method = "CreateEndpoint", error = %e, "Request failed");
            Json(CreateEndpointResponse {
                err: e.to_string(),
            })
        }
    }
}

pub async fn delete_endpoint(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Response> {
    respond(
        "DeleteEndpoint",
        run(&state, &body, NetworkDriver::delete_endpoint).await,
    )
}

pub async fn endpoint_oper_info(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<EndpointInfoResponse> {
    match run(&state, &body, NetworkDriver::endpoint_oper_info).await {
        Ok(resp) => Json(resp),
        Err(e) => {
            warn!(method = "EndpointOperInfo", error = %e, "Request failed");
            Json(EndpointInfoResponse {
                err: e.to_string(),
                ..Default::default()
            })
        }
    }
}

pub async fn join(State(state): State<Arc<AppState>>, body: Bytes) -> Json<JoinResponse> {
    match run(&state, &body, NetworkDriver::join).await {
        Ok(resp) => Json(resp),
        Err(e) => {
            warn!(method = "Join", error = %e, "Request failed");
            Json(JoinResponse {
                err: e.to_string(),
                ..Default::default()
            })
        }
    }
}

pub async fn leave(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Response> {
    respond("Leave", run(&state, &body, NetworkDriver::leave).await)
}

pub async fn discover_new(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Response> {
    respond(
        "DiscoverNew",
        run(&state, &body, NetworkDriver::discover_new).await,
    )
}

pub async fn discover_delete(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Response> {
    respond(
        "DiscoverDelete",
        run(&state, &body, NetworkDriver::discover_delete).await,
    )
}

pub async fn program_external_connectivity(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<Response> {
    respond(
        "ProgramExternalConnectivity",
        run(&state, &body, NetworkDriver::program_external_connectivity).await,
    )
}

pub async fn revoke_external_connectivity(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<Response> {
    respond(
        "RevokeExternalConnectivity",
        run(&state, &body, NetworkDriver::revoke_external_connectivity).await,
    )
}

// === IPAM driver ===

pub async fn ipam_get_capabilities(
    State(state): State<Arc<AppState>>,
) -> Json<IpamCapabilitiesResponse> {
    Json(state.ipam.get_capabilities())
}

pub async fn ipam_get_default_address_spaces(
    State(state): State<Arc<AppState>>,
) -> Json<AddressSpacesResponse> {
    Json(state.ipam.get_default_address_spaces())
}

pub async fn ipam_request_pool(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<RequestPoolResponse> {
    match decode_ipam(&body).and_then(|req| state.ipam.request_pool(&req)) {
        Ok(resp) => Json(resp),
        Err(e) => {
            warn!(method = "RequestPool", error = %e, "Request failed");
            Json(RequestPoolResponse {
                error: e.to_string(),
                ..Default::default()
            })
        }
    }
}

pub async fn ipam_release_pool(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<IpamResponse> {
    respond_ipam(
        "ReleasePool",
        decode_ipam(&body).and_then(|req| state.ipam.release_pool(&req)),
    )
}

pub async fn ipam_request_address(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<RequestAddressResponse> {
    match decode_ipam(&body).and_then(|req| state.ipam.request_address(&req)) {
        Ok(resp) => Json(resp),
        Err(e) => {
            warn!(method = "RequestAddress", error = %e, "Request failed");
            Json(RequestAddressResponse {
                error: e.to_string(),
                ..Default::default()
            })
        }
    }
}

pub async fn ipam_release_address(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<IpamResponse> {
    respond_ipam(
        "ReleaseAddress",
        decode_ipam(&body).and_then(|req| state.ipam.release_address(&req)),
    )
}
