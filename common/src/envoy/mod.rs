//! Typed Envoy resource shapes
//!
//! Plain serde models of the configuration resources the control plane
//! serves over xDS: Listeners, RouteConfigurations, Clusters and
//! ClusterLoadAssignments, plus the static bootstrap document. These are
//! deliberately config-shaped (the JSON Envoy accepts), not generated
//! protobuf bindings; the gRPC transport layer owns the conversion to its
//! wire representation.

pub mod bootstrap;
pub mod cluster;
pub mod endpoint;
pub mod listener;
pub mod route;

pub use bootstrap::{Bootstrap, BootstrapConfig};
pub use cluster::{
    ApiConfigSource, CircuitBreakers, Cluster, ConfigSource, DiscoveryType, GrpcService,
    HealthCheck, Http2ProtocolOptions, HttpHealthCheck, LbPolicy, Thresholds, UpstreamTlsContext,
};
pub use endpoint::{ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints};
pub use listener::{
    AccessLog, DownstreamTlsContext, Filter, FilterChain, FilterChainMatch, FilterConfig,
    HttpConnectionManager, HttpFilter, Listener, ListenerFilter, TcpProxyConfig,
};
pub use route::{
    HeaderValue, HeaderValueOption, RedirectAction, Route, RouteAction, RouteConfiguration,
    RouteMatch, RoutePolicy, UpgradeConfig, VirtualHost, WeightedCluster, WeightedClusters,
};

use serde::{Deserialize, Serialize};

/// Name of the static cluster through which Envoy reaches the xDS server.
pub const XDS_CLUSTER: &str = "contour";

/// A resolved network address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Builds a TCP socket address.
pub fn socket_address(address: impl Into<String>, port: u32) -> Address {
    Address {
        socket_address: SocketAddress {
            address: address.into(),
            port_value: port,
            protocol: None,
        },
    }
}

/// Minimum TLS protocol version offered on a filter chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsProtocol {
    #[default]
    #[serde(rename = "TLSv1_1")]
    V1_1,
    #[serde(rename = "TLSv1_2")]
    V1_2,
    #[serde(rename = "TLSv1_3")]
    V1_3,
}

impl TlsProtocol {
    /// Maps an annotation or CRD value to a protocol version. "1.2" and
    /// "1.3" are recognized; any other value means TLS/1.1.
    pub fn from_config_value(version: &str) -> TlsProtocol {
        match version {
            "1.3" => TlsProtocol::V1_3,
            "1.2" => TlsProtocol::V1_2,
            _ => TlsProtocol::V1_1,
        }
    }
}
