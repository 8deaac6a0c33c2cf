//! IPAM driver. Holds no state: pools and addresses are echoed back to the
//! caller without any allocation tracking.

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::{
    AddressSpacesResponse, IpamCapabilitiesResponse, ReleaseAddressRequest, ReleasePoolRequest,
    RequestAddressRequest, RequestAddressResponse, RequestPoolRequest, RequestPoolResponse,
};

/// Prefix length appended to every requested address.
// TODO: derive the mask from the pool the address was requested from.
pub const ADDRESS_PREFIX_LEN: u8 = 24;

#[derive(Debug, Error)]
pub enum IpamError {
    #[error("Invalid request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Request does not have IP address. Specify using --ip")]
    MissingAddress,
}

pub type Result<T> = std::result::Result<T, IpamError>;

#[derive(Debug, Default, Clone, Copy)]
pub struct IpamDriver;

impl IpamDriver {
    pub fn get_capabilities(&self) -> IpamCapabilitiesResponse {
        IpamCapabilitiesResponse {
            requires_mac_address: true,
            ..Default::default()
        }
    }

    pub fn get_default_address_spaces(&self) -> AddressSpacesResponse {
        AddressSpacesResponse::default()
    }

    /// Hand out a fresh pool ID for the requested CIDR.
    pub fn request_pool(&self, req: &RequestPoolRequest) -> Result<RequestPoolResponse> {
        let pool_id = Uuid::new_v4().to_string();
        info!(%pool_id, pool = %req.pool, "Pool requested");
        Ok(RequestPoolResponse {
            pool_id,
            pool: req.pool.clone(),
            ..Default::default()
        })
    }

    pub fn release_pool(&self, req: &ReleasePoolRequest) -> Result<()> {
        debug!(pool_id = %req.pool_id, "Pool released");
        Ok(())
    }

    pub fn request_address(&self, req: &RequestAddressRequest) -> Result<RequestAddressResponse> {
        if req.address.is_empty() {
            return Err(IpamError::MissingAddress);
        }
        let address = format!("{}/{}", req.address, ADDRESS_PREFIX_LEN);
        info!(pool_id = %req.pool_id, %address, "Address requested");
        Ok(RequestAddressResponse {
            address,
            ..Default::default()
        })
    }

    pub fn release_address(&self, req: &ReleaseAddressRequest) -> Result<()> {
        debug!(pool_id = %req.pool_id, address = %req.address, "Address released");
        Ok(())
    }
}
