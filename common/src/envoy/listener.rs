//! Listener resources (LDS)

use serde::{Deserialize, Serialize};

use super::route::RouteConfiguration;
use super::{Address, TlsProtocol, XDS_CLUSTER};

/// Well-known filter names.
pub const HTTP_CONNECTION_MANAGER: &str = "envoy.http_connection_manager";
pub const TCP_PROXY: &str = "envoy.tcp_proxy";
pub const TLS_INSPECTOR: &str = "envoy.listener.tls_inspector";
pub const ROUTER: &str = "envoy.router";
pub const HEALTH_CHECK: &str = "envoy.health_check";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listener_filters: Vec<ListenerFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_chains: Vec<FilterChain>,
}

/// A filter that runs on the accepted connection before the filter chain
/// is selected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListenerFilter {
    pub name: String,
}

impl ListenerFilter {
    pub fn tls_inspector() -> ListenerFilter {
        ListenerFilter {
            name: TLS_INSPECTOR.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_chain_match: Option<FilterChainMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_context: Option<DownstreamTlsContext>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_proxy_proto: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

/// Matches a filter chain by SNI server name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterChainMatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub config: FilterConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterConfig {
    HttpConnectionManager(Box<HttpConnectionManager>),
    TcpProxy(TcpProxyConfig),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConnectionManager {
    pub stat_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds: Option<Rds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_config: Option<RouteConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_filters: Vec<HttpFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_log: Vec<AccessLog>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub normalize_path: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_remote_address: bool,
}

/// Points the connection manager at a RouteConfiguration served over RDS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rds {
    pub route_config_name: String,
    pub config_source: super::ConfigSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpFilter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl HttpFilter {
    pub fn router() -> HttpFilter {
        HttpFilter {
            name: ROUTER.to_string(),
            config: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessLog {
    pub name: String,
    pub config: AccessLogConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessLogConfig {
    pub path: String,
}

impl AccessLog {
    /// File access log writing to `path`.
    pub fn file(path: impl Into<String>) -> Vec<AccessLog> {
        vec![AccessLog {
            name: "envoy.file_access_log".to_string(),
            config: AccessLogConfig { path: path.into() },
        }]
    }
}

/// TCP proxy filter configuration. Either a single cluster or a weighted
/// set; an empty config (no upstreams resolved) serializes with neither.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpProxyConfig {
    pub stat_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_clusters: Option<TcpWeightedClusters>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_log: Vec<AccessLog>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpWeightedClusters {
    pub clusters: Vec<TcpWeightedCluster>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TcpWeightedCluster {
    pub name: String,
    pub weight: u32,
}

/// Server-side TLS context built from a `kubernetes.io/tls` secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownstreamTlsContext {
    pub common_tls_context: CommonTlsContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonTlsContext {
    pub tls_params: TlsParams,
    pub tls_certificates: Vec<TlsCertificate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn_protocols: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsParams {
    pub tls_minimum_protocol_version: TlsProtocol,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsCertificate {
    pub certificate_chain: DataSource,
    pub private_key: DataSource,
}

/// Inline configuration bytes. Certificates and keys arrive as PEM text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub inline_string: String,
}

impl DownstreamTlsContext {
    pub fn new(cert: &[u8], key: &[u8], min_proto: TlsProtocol, alpn: &[&str]) -> Self {
        DownstreamTlsContext {
            common_tls_context: CommonTlsContext {
                tls_params: TlsParams {
                    tls_minimum_protocol_version: min_proto,
                },
                tls_certificates: vec![TlsCertificate {
                    certificate_chain: DataSource {
                        inline_string: String::from_utf8_lossy(cert).into_owned(),
                    },
                    private_key: DataSource {
                        inline_string: String::from_utf8_lossy(key).into_owned(),
                    },
                }],
                alpn_protocols: alpn.iter().map(|p| p.to_string()).collect(),
            },
        }
    }
}

/// HTTP connection manager filter wired for RDS against the xDS cluster.
pub fn http_connection_manager(route_config_name: &str, access_log_path: &str) -> Filter {
    Filter {
        name: HTTP_CONNECTION_MANAGER.to_string(),
        config: FilterConfig::HttpConnectionManager(Box::new(HttpConnectionManager {
            stat_prefix: route_config_name.to_string(),
            rds: Some(Rds {
                route_config_name: route_config_name.to_string(),
                config_source: super::ConfigSource::grpc(XDS_CLUSTER),
            }),
            http_filters: vec![HttpFilter::router()],
            access_log: AccessLog::file(access_log_path),
            use_remote_address: true,
            ..Default::default()
        })),
    }
}

/// TCP proxy filter forwarding the raw stream to the given clusters.
///
/// `clusters` are (name, weight) pairs; a single entry uses the scalar
/// `cluster` field, several entries use `weighted_clusters`.
pub fn tcp_proxy(stat_prefix: &str, clusters: Vec<(String, u32)>, access_log_path: &str) -> Filter {
    let mut config = TcpProxyConfig {
        stat_prefix: stat_prefix.to_string(),
        access_log: AccessLog::file(access_log_path),
        ..Default::default()
    };
    match clusters.len() {
        0 => {}
        1 => config.cluster = Some(clusters[0].0.clone()),
        _ => {
            config.weighted_clusters = Some(TcpWeightedClusters {
                clusters: clusters
                    .into_iter()
                    .map(|(name, weight)| TcpWeightedCluster { name, weight })
                    .collect(),
            });
        }
    }
    Filter {
        name: TCP_PROXY.to_string(),
        config: FilterConfig::TcpProxy(config),
    }
}
