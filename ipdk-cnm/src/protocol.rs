//! Wire types of the Docker remote network driver and IPAM driver protocols.
//!
//! Field names follow libnetwork's JSON encoding. Network driver responses
//! carry failures in `Err`, IPAM responses in `Error`; both are always sent
//! with HTTP 200.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// =============================================================================
// Plugin activation
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

// =============================================================================
// Network driver
// =============================================================================

/// Generic network driver response carrying only the error string.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

impl Response {
    pub fn error(err: impl ToString) -> Self {
        Self {
            err: err.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub scope: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connectivity_scope: String,
    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamData {
    #[serde(default)]
    pub address_space: String,
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub aux_addresses: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Option<Vec<IpamData>>,
    #[serde(rename = "IPv6Data", default)]
    pub ipv6_data: Option<Vec<IpamData>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeleteNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInterface {
    #[serde(default)]
    pub address: String,
    #[serde(rename = "AddressIPv6", default)]
    pub address_ipv6: String,
    #[serde(default)]
    pub mac_address: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Interface", default)]
    pub interface: Option<EndpointInterface>,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
}

/// The address comes from IPAM, so the interface is never echoed back.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateEndpointResponse {
    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Request shape shared by DeleteEndpoint, EndpointOperInfo, Leave and
/// RevokeExternalConnectivity.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EndpointRequest {
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,
    #[serde(rename = "EndpointID", default)]
    pub endpoint_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EndpointInfoResponse {
    #[serde(rename = "Value")]
    pub value: HashMap<String, Value>,
    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "SandboxKey", default)]
    pub sandbox_key: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(rename = "InterfaceName", default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<InterfaceName>,
    #[serde(rename = "Gateway", default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(rename = "GatewayIPv6", default, skip_serializing_if = "String::is_empty")]
    pub gateway_ipv6: String,
    #[serde(rename = "DisableGatewayService", default)]
    pub disable_gateway_service: bool,
    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryNotification {
    #[serde(default)]
    pub discovery_type: i64,
    #[serde(default)]
    pub discovery_data: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProgramExternalConnectivityRequest {
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,
    #[serde(rename = "EndpointID", default)]
    pub endpoint_id: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
}

// =============================================================================
// IPAM driver
// =============================================================================

/// Generic IPAM response carrying only the error string.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IpamResponse {
    #[serde(rename = "Error", default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl IpamResponse {
    pub fn error(err: impl ToString) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamCapabilitiesResponse {
    #[serde(rename = "RequiresMACAddress")]
    pub requires_mac_address: bool,
    #[serde(default)]
    pub requires_request_replay: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddressSpacesResponse {
    pub local_default_address_space: String,
    pub global_default_address_space: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPoolRequest {
    #[serde(default)]
    pub address_space: String,
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub sub_pool: String,
    #[serde(default)]
    pub options: Option<HashMap<String, String>>,
    #[serde(default)]
    pub v6: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPoolResponse {
    #[serde(rename = "PoolID", default, skip_serializing_if = "String::is_empty")]
    pub pool_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pool: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReleasePoolRequest {
    #[serde(rename = "PoolID", default)]
    pub pool_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RequestAddressRequest {
    #[serde(rename = "PoolID", default)]
    pub pool_id: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestAddressResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReleaseAddressRequest {
    #[serde(rename = "PoolID", default)]
    pub pool_id: String,
    #[serde(rename = "Address", default)]
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_network_request_from_docker() {
        let body = json!({
            "NetworkID": "abc123",
            "Options": {"com.docker.network.generic": {}},
            "IPv4Data": [{
                "AddressSpace": "",
                "Pool": "10.0.0.0/24",
                "Gateway": "10.0.0.1/24",
                "AuxAddresses": null
            }],
            "IPv6Data": []
        });
        let req: CreateNetworkRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.network_id, "abc123");
        let ipv4 = req.ipv4_data.unwrap();
        assert_eq!(ipv4[0].gateway.as_deref(), Some("10.0.0.1/24"));
        assert!(ipv4[0].aux_addresses.is_none());
    }

    #[test]
    fn empty_response_has_no_err_field() {
        assert_eq!(serde_json::to_value(Response::default()).unwrap(), json!({}));
        assert_eq!(
            serde_json::to_value(Response::error("bad")).unwrap(),
            json!({"Err": "bad"})
        );
        assert_eq!(
            serde_json::to_value(IpamResponse::error("bad")).unwrap(),
            json!({"Error": "bad"})
        );
        assert_eq!(
            serde_json::to_value(CreateEndpointResponse::default()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn join_response_shape() {
        let resp = JoinResponse {
            interface_name: Some(InterfaceName {
                src_name: "10.0.0.5".to_string(),
                dst_prefix: "eth".to_string(),
            }),
            gateway: "10.0.0.1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(resp).unwrap(),
            json!({
                "InterfaceName": {"SrcName": "10.0.0.5", "DstPrefix": "eth"},
                "Gateway": "10.0.0.1",
                "DisableGatewayService": false
            })
        );
    }
}
