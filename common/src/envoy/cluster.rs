//! Cluster resources (CDS)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::endpoint::ClusterLoadAssignment;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eds_cluster_config: Option<EdsClusterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_assignment: Option<ClusterLoadAssignment>,
    #[serde(default, skip_serializing_if = "is_default_lb_policy")]
    pub lb_policy: LbPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breakers: Option<CircuitBreakers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2_protocol_options: Option<Http2ProtocolOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_context: Option<UpstreamTlsContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<HealthCheck>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryType {
    #[serde(rename = "EDS")]
    Eds,
    #[serde(rename = "STRICT_DNS")]
    StrictDns,
    #[serde(rename = "LOGICAL_DNS")]
    LogicalDns,
    #[serde(rename = "STATIC")]
    Static,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdsClusterConfig {
    pub eds_config: ConfigSource,
    pub service_name: String,
}

/// Where a dynamic resource is fetched from. Always the management gRPC
/// cluster in this deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub api_config_source: ApiConfigSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiConfigSource {
    pub api_type: String,
    pub grpc_services: Vec<GrpcService>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrpcService {
    pub envoy_grpc: EnvoyGrpc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvoyGrpc {
    pub cluster_name: String,
}

impl ConfigSource {
    /// gRPC config source reading from the named static cluster.
    pub fn grpc(cluster_name: &str) -> ConfigSource {
        ConfigSource {
            api_config_source: ApiConfigSource {
                api_type: "GRPC".to_string(),
                grpc_services: vec![GrpcService {
                    envoy_grpc: EnvoyGrpc {
                        cluster_name: cluster_name.to_string(),
                    },
                }],
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LbPolicy {
    #[default]
    #[serde(rename = "ROUND_ROBIN")]
    RoundRobin,
    #[serde(rename = "LEAST_REQUEST")]
    LeastRequest,
    #[serde(rename = "RANDOM")]
    Random,
    #[serde(rename = "RING_HASH")]
    RingHash,
    #[serde(rename = "MAGLEV")]
    Maglev,
}

fn is_default_lb_policy(p: &LbPolicy) -> bool {
    *p == LbPolicy::RoundRobin
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakers {
    pub thresholds: Vec<Thresholds>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_connections: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_pending_requests: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_requests: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_retries: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// Marker enabling HTTP/2 on the upstream connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Http2ProtocolOptions {}

/// Marker enabling TLS towards the upstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamTlsContext {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
    pub http_health_check: HttpHealthCheck,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHealthCheck {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
}
