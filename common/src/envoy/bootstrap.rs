//! Static bootstrap document for the managed Envoy
//!
//! The control plane does not serve this over xDS; it is written to disk
//! once so Envoy can find the management cluster, the admin interface and
//! the stats listener.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::cluster::{
    CircuitBreakers, Cluster, ConfigSource, DiscoveryType, Http2ProtocolOptions, Thresholds,
};
use super::endpoint::{lb_endpoint, ClusterLoadAssignment, LocalityLbEndpoints};
use super::listener::{
    Filter, FilterChain, FilterConfig, HttpConnectionManager, HttpFilter, Listener,
    HEALTH_CHECK, HTTP_CONNECTION_MANAGER,
};
use super::route::{
    Route, RouteAction, RouteConfiguration, RouteMatch, RoutePolicy, VirtualHost,
};
use super::{socket_address, Address, XDS_CLUSTER};

/// Parameters of the generated bootstrap. Zero values fall back to the
/// defaults used by the deployment manifests.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BootstrapConfig {
    /// Address the xDS management server listens on.
    pub xds_address: String,
    /// Port of the xDS management server.
    pub xds_port: u32,
    /// Address of the Envoy admin interface.
    pub admin_address: String,
    /// Port of the Envoy admin interface.
    pub admin_port: u32,
    /// Admin access log path.
    pub admin_access_log_path: String,
    /// Address the static stats listener binds.
    pub stats_address: String,
    /// Port of the static stats listener.
    pub stats_port: u32,
    /// Emit a statsd sink.
    pub statsd_enabled: bool,
    /// Address of the statsd collector.
    pub statsd_address: String,
    /// Port of the statsd collector.
    pub statsd_port: u32,
}

impl BootstrapConfig {
    fn xds_address(&self) -> &str {
        or_default(&self.xds_address, "127.0.0.1")
    }
    fn xds_port(&self) -> u32 {
        or_default_port(self.xds_port, 8001)
    }
    fn admin_address(&self) -> &str {
        or_default(&self.admin_address, "127.0.0.1")
    }
    fn admin_port(&self) -> u32 {
        or_default_port(self.admin_port, 9001)
    }
    fn admin_access_log_path(&self) -> &str {
        or_default(&self.admin_access_log_path, "/dev/null")
    }
    fn stats_address(&self) -> &str {
        or_default(&self.stats_address, "0.0.0.0")
    }
    fn stats_port(&self) -> u32 {
        or_default_port(self.stats_port, 8002)
    }
    fn statsd_address(&self) -> &str {
        or_default(&self.statsd_address, "127.0.0.1")
    }
    fn statsd_port(&self) -> u32 {
        or_default_port(self.statsd_port, 9125)
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn or_default_port(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub static_resources: StaticResources,
    pub dynamic_resources: DynamicResources,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stats_sinks: Vec<StatsSink>,
    pub admin: Admin,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticResources {
    pub listeners: Vec<Listener>,
    pub clusters: Vec<Cluster>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicResources {
    pub lds_config: ConfigSource,
    pub cds_config: ConfigSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsSink {
    pub name: String,
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    pub access_log_path: String,
    pub address: Address,
}

/// Builds the bootstrap document for the supplied configuration.
pub fn bootstrap(config: &BootstrapConfig) -> Bootstrap {
    let mut stats_sinks = Vec::new();
    if config.statsd_enabled {
        stats_sinks.push(StatsSink {
            name: "envoy.statsd".to_string(),
            config: json!({
                "address": {
                    "socket_address": {
                        "address": config.statsd_address(),
                        "port_value": config.statsd_port(),
                        "protocol": "UDP",
                    },
                },
            }),
        });
    }

    Bootstrap {
        static_resources: StaticResources {
            listeners: vec![stats_listener(config)],
            clusters: vec![xds_cluster(config), stats_cluster(config)],
        },
        dynamic_resources: DynamicResources {
            lds_config: ConfigSource::grpc(XDS_CLUSTER),
            cds_config: ConfigSource::grpc(XDS_CLUSTER),
        },
        stats_sinks,
        admin: Admin {
            access_log_path: config.admin_access_log_path().to_string(),
            address: socket_address(config.admin_address(), config.admin_port()),
        },
    }
}

/// The stats listener exposes `/healthz` (via the health check filter) and
/// proxies `/stats` to the admin interface.
fn stats_listener(config: &BootstrapConfig) -> Listener {
    Listener {
        name: String::new(),
        address: socket_address(config.stats_address(), config.stats_port()),
        listener_filters: Vec::new(),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: HTTP_CONNECTION_MANAGER.to_string(),
                config: FilterConfig::HttpConnectionManager(Box::new(HttpConnectionManager {
                    stat_prefix: "stats".to_string(),
                    codec_type: Some("AUTO".to_string()),
                    route_config: Some(RouteConfiguration {
                        name: String::new(),
                        virtual_hosts: vec![VirtualHost {
                            name: "backend".to_string(),
                            domains: vec!["*".to_string()],
                            routes: vec![Route {
                                match_: RouteMatch {
                                    prefix: "/stats".to_string(),
                                },
                                action: RouteAction::Route(RoutePolicy {
                                    cluster: Some("service_stats".to_string()),
                                    ..Default::default()
                                }),
                            }],
                            response_headers_to_add: Vec::new(),
                        }],
                    }),
                    http_filters: vec![
                        HttpFilter {
                            name: HEALTH_CHECK.to_string(),
                            config: Some(json!({
                                "pass_through_mode": "false",
                                "headers": [{
                                    "name": ":path",
                                    "exact_match": "/healthz",
                                }],
                            })),
                        },
                        HttpFilter::router(),
                    ],
                    normalize_path: true,
                    ..Default::default()
                })),
            }],
            ..Default::default()
        }],
    }
}

fn xds_cluster(config: &BootstrapConfig) -> Cluster {
    Cluster {
        name: XDS_CLUSTER.to_string(),
        discovery_type: DiscoveryType::StrictDns,
        connect_timeout: Duration::from_secs(5),
        eds_cluster_config: None,
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: XDS_CLUSTER.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![lb_endpoint(config.xds_address(), config.xds_port())],
            }],
        }),
        lb_policy: Default::default(),
        circuit_breakers: Some(CircuitBreakers {
            thresholds: vec![
                Thresholds {
                    priority: Some("HIGH".to_string()),
                    max_connections: 100_000,
                    max_pending_requests: 100_000,
                    max_requests: 60_000_000,
                    max_retries: 50,
                },
                Thresholds {
                    priority: None,
                    max_connections: 100_000,
                    max_pending_requests: 100_000,
                    max_requests: 60_000_000,
                    max_retries: 50,
                },
            ],
        }),
        http2_protocol_options: Some(Http2ProtocolOptions::default()),
        tls_context: None,
        health_checks: Vec::new(),
    }
}

fn stats_cluster(config: &BootstrapConfig) -> Cluster {
    Cluster {
        name: "service_stats".to_string(),
        discovery_type: DiscoveryType::LogicalDns,
        connect_timeout: Duration::from_millis(250),
        eds_cluster_config: None,
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: "service_stats".to_string(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![lb_endpoint(config.admin_address(), config.admin_port())],
            }],
        }),
        lb_policy: Default::default(),
        circuit_breakers: None,
        http2_protocol_options: None,
        tls_context: None,
        health_checks: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bootstrap_static_resources() {
        let b = bootstrap(&BootstrapConfig::default());
        let json = serde_json::to_value(&b).expect("serialize");

        let listener = &json["static_resources"]["listeners"][0];
        assert_eq!(
            listener["address"]["socket_address"]["port_value"],
            8002,
            "stats listener binds 0.0.0.0:8002"
        );
        let hcm = &listener["filter_chains"][0]["filters"][0];
        assert_eq!(hcm["name"], "envoy.http_connection_manager");
        assert_eq!(hcm["config"]["stat_prefix"], "stats");
        assert_eq!(hcm["config"]["normalize_path"], true);
        assert_eq!(
            hcm["config"]["route_config"]["virtual_hosts"][0]["routes"][0]["route"]["cluster"],
            "service_stats"
        );
        assert_eq!(
            hcm["config"]["http_filters"][0]["name"],
            "envoy.health_check"
        );
        assert_eq!(
            hcm["config"]["http_filters"][0]["config"]["headers"][0]["exact_match"],
            "/healthz"
        );

        let contour = &json["static_resources"]["clusters"][0];
        assert_eq!(contour["name"], "contour");
        assert_eq!(contour["type"], "STRICT_DNS");
        assert_eq!(contour["connect_timeout"], "5s");
        assert_eq!(
            contour["load_assignment"]["endpoints"][0]["lb_endpoints"][0]["endpoint"]["address"]
                ["socket_address"]["port_value"],
            8001
        );
        assert_eq!(
            contour["circuit_breakers"]["thresholds"][0]["priority"],
            "HIGH"
        );
        assert_eq!(contour["http2_protocol_options"], serde_json::json!({}));

        assert_eq!(json["admin"]["access_log_path"], "/dev/null");
        assert_eq!(
            json["admin"]["address"]["socket_address"]["port_value"],
            9001
        );
        assert!(json.get("stats_sinks").is_none());
    }

    #[test]
    fn test_statsd_sink_is_optional() {
        let b = bootstrap(&BootstrapConfig {
            statsd_enabled: true,
            ..Default::default()
        });
        let json = serde_json::to_value(&b).expect("serialize");
        assert_eq!(json["stats_sinks"][0]["name"], "envoy.statsd");
        assert_eq!(
            json["stats_sinks"][0]["config"]["address"]["socket_address"]["protocol"],
            "UDP"
        );
        assert_eq!(
            json["stats_sinks"][0]["config"]["address"]["socket_address"]["port_value"],
            9125
        );
    }

    #[test]
    fn test_dynamic_resources_point_at_management_cluster() {
        let b = bootstrap(&BootstrapConfig::default());
        let json = serde_json::to_value(&b).expect("serialize");
        for key in ["lds_config", "cds_config"] {
            assert_eq!(
                json["dynamic_resources"][key]["api_config_source"]["grpc_services"][0]
                    ["envoy_grpc"]["cluster_name"],
                "contour"
            );
        }
    }
}
