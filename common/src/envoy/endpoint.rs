//! ClusterLoadAssignment resources (EDS)

use serde::{Deserialize, Serialize};

use super::{socket_address, Address};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalityLbEndpoints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Address,
}

/// A single endpoint at `address:port`.
pub fn lb_endpoint(address: impl Into<String>, port: u32) -> LbEndpoint {
    LbEndpoint {
        endpoint: Endpoint {
            address: socket_address(address, port),
        },
    }
}
