//! Network driver: network and endpoint lifecycle.
//!
//! All operations are synchronous and may block on the ledger and on external
//! commands; the HTTP layer runs them on the blocking thread pool.

use ipnet::IpNet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::protocol::{
    CapabilitiesResponse, CreateEndpointRequest, CreateNetworkRequest, DeleteNetworkRequest,
    DiscoveryNotification, EndpointInfoResponse, EndpointRequest, InterfaceName, JoinRequest,
    JoinResponse, ProgramExternalConnectivityRequest,
};
use crate::provisioner::{ProvisionError, Provisioner};
use crate::record::EndpointRecord;
use crate::state::StateStore;

/// Interface name prefix inside the container (`eth0`, `eth1`, ...).
const DST_PREFIX: &str = "eth";

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Invalid request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Network not found: {0}")]
    UnknownNetwork(String),

    #[error("Endpoint not found: {0}")]
    UnknownEndpoint(String),

    #[error("Endpoint already exists: {0}")]
    EndpointExists(String),

    #[error("IP Address parameter not provided in docker run")]
    MissingAddress,

    #[error("Invalid IP Address {address}: {source}")]
    Address {
        address: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("Network {0} has no IPv4 gateway")]
    MissingGateway(String),

    #[error("Incompatible network: {0}")]
    IncompatibleNetwork(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    #[error("Dataplane cleanup failed: {0}")]
    Deprovisioning(#[source] ProvisionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

fn parse_cidr(address: &str) -> Result<IpNet> {
    address.parse().map_err(|source| DriverError::Address {
        address: address.to_string(),
        source,
    })
}

pub struct NetworkDriver {
    store: Arc<StateStore>,
    provisioner: Arc<dyn Provisioner>,
    /// Bridge reference recorded for every network.
    bridge: String,
}

impl NetworkDriver {
    pub fn new(
        store: Arc<StateStore>,
        provisioner: Arc<dyn Provisioner>,
        bridge: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provisioner,
            bridge: bridge.into(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn get_capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            scope: "local".to_string(),
            ..Default::default()
        }
    }

    /// Record the network → bridge mapping. An existing ID is overwritten.
    pub fn create_network(&self, req: &CreateNetworkRequest) -> Result<()> {
        let gateway = req
            .ipv4_data
            .as_deref()
            .and_then(|data| data.first())
            .and_then(|data| data.gateway.as_deref())
            .filter(|gw| !gw.is_empty())
            .ok_or_else(|| DriverError::MissingGateway(req.network_id.clone()))?;
        let gateway = parse_cidr(gateway)?;

        let (_, bridge) = self
            .store
            .create_network_entry(&req.network_id, &self.bridge, gateway);

        info!(
            network_id = %req.network_id,
            %gateway,
            bridge = %self.bridge,
            bridge_id = bridge.sequence,
            "Network created"
        );
        Ok(())
    }

    /// Remove the network and its bridge record. Attached endpoints are left
    /// alone.
    pub fn delete_network(&self, req: &DeleteNetworkRequest) -> Result<()> {
        let record = self
            .store
            .delete_network_entry(&req.network_id)
            .ok_or_else(|| DriverError::UnknownNetwork(req.network_id.clone()))?;

        info!(network_id = %req.network_id, bridge = %record.bridge, "Network deleted");
        Ok(())
    }

    /// Provision the dataplane port for an endpoint and record it.
    ///
    /// Nothing is provisioned unless the address parses and the network is
    /// known. A provisioning failure leaves whatever steps already ran in
    /// place and records nothing.
    pub fn create_endpoint(&self, req: &CreateEndpointRequest) -> Result<EndpointRecord> {
        let address = req
            .interface
            .as_ref()
            .map(|iface| iface.address.as_str())
            .filter(|addr| !addr.is_empty())
            .ok_or(DriverError::MissingAddress)?;
        let cidr = parse_cidr(address)?;

        let network = self
            .store
            .lookup_network(&req.network_id)
            .ok_or_else(|| DriverError::UnknownNetwork(req.network_id.clone()))?;
        if network.bridge.is_empty() {
            return Err(DriverError::IncompatibleNetwork(req.network_id.clone()));
        }
        if self.store.lookup_endpoint(&req.endpoint_id).is_some() {
            return Err(DriverError::EndpointExists(req.endpoint_id.clone()));
        }

        let interface_index = self.store.next_interface_index();
        let port = self
            .provisioner
            .provision_endpoint(cidr.addr(), interface_index)
            .inspect_err(|e| {
                error!(
                    endpoint_id = %req.endpoint_id,
                    %address,
                    interface_index,
                    error = %e,
                    "Provisioning failed, dataplane state may be left behind"
                );
            })?;

        let record = EndpointRecord {
            network_id: req.network_id.clone(),
            address: address.to_string(),
            port_name: port.port_name,
            interface_index,
        };
        if !self
            .store
            .create_endpoint_entry(&req.endpoint_id, record.clone())
        {
            warn!(
                endpoint_id = %req.endpoint_id,
                port_name = %record.port_name,
                "Endpoint created concurrently, provisioned port is orphaned"
            );
            return Err(DriverError::EndpointExists(req.endpoint_id.clone()));
        }

        info!(
            endpoint_id = %req.endpoint_id,
            network_id = %req.network_id,
            %address,
            port_name = %record.port_name,
            socket = %port.socket_path.display(),
            interface_index,
            "Endpoint created"
        );
        Ok(record)
    }

    /// Remove the placeholder interface and socket directory, then forget the
    /// endpoint. The record is kept if deprovisioning fails.
    pub fn delete_endpoint(&self, req: &EndpointRequest) -> Result<()> {
        let record = self
            .store
            .lookup_endpoint(&req.endpoint_id)
            .ok_or_else(|| DriverError::UnknownEndpoint(req.endpoint_id.clone()))?;

        self.provisioner
            .deprovision_endpoint(&record.port_name)
            .map_err(DriverError::Deprovisioning)?;
        self.store.delete_endpoint_entry(&req.endpoint_id);

        info!(
            endpoint_id = %req.endpoint_id,
            port_name = %record.port_name,
            "Endpoint deleted"
        );
        Ok(())
    }

    pub fn endpoint_oper_info(&self, req: &EndpointRequest) -> Result<EndpointInfoResponse> {
        debug!(endpoint_id = %req.endpoint_id, "Endpoint info requested");
        Ok(EndpointInfoResponse::default())
    }

    /// Hand the placeholder interface and gateway to the container runtime.
    pub fn join(&self, req: &JoinRequest) -> Result<JoinResponse> {
        let network = self
            .store
            .lookup_network(&req.network_id)
            .ok_or_else(|| DriverError::UnknownNetwork(req.network_id.clone()))?;
        let endpoint = self
            .store
            .lookup_endpoint(&req.endpoint_id)
            .ok_or_else(|| DriverError::UnknownEndpoint(req.endpoint_id.clone()))?;

        let resp = JoinResponse {
            interface_name: Some(InterfaceName {
                src_name: endpoint.port_name.clone(),
                dst_prefix: DST_PREFIX.to_string(),
            }),
            gateway: network.gateway.addr().to_string(),
            ..Default::default()
        };
        info!(
            endpoint_id = %req.endpoint_id,
            src_name = %endpoint.port_name,
            gateway = %resp.gateway,
            "Join"
        );
        Ok(resp)
    }

    // The remaining methods carry no state; the protocol still needs an answer.

    pub fn leave(&self, req: &EndpointRequest) -> Result<()> {
        debug!(endpoint_id = %req.endpoint_id, "Leave");
        Ok(())
    }

    pub fn discover_new(&self, req: &DiscoveryNotification) -> Result<()> {
        debug!(discovery_type = req.discovery_type, "DiscoverNew");
        Ok(())
    }

    pub fn discover_delete(&self, req: &DiscoveryNotification) -> Result<()> {
        debug!(discovery_type = req.discovery_type, "DiscoverDelete");
        Ok(())
    }

    pub fn program_external_connectivity(
        &self,
        req: &ProgramExternalConnectivityRequest,
    ) -> Result<()> {
        debug!(endpoint_id = %req.endpoint_id, "ProgramExternalConnectivity");
        Ok(())
    }

    pub fn revoke_external_connectivity(&self, req: &EndpointRequest) -> Result<()> {
        debug!(endpoint_id = %req.endpoint_id, "RevokeExternalConnectivity");
        Ok(())
    }
}
