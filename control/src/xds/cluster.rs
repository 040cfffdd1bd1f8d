//! The cluster visitor (CDS)

use std::collections::BTreeMap;
use std::time::Duration;

use common::envoy::{
    CircuitBreakers, Cluster, ConfigSource, DiscoveryType, HealthCheck, Http2ProtocolOptions,
    HttpHealthCheck, Thresholds, UpstreamTlsContext, XDS_CLUSTER,
};
use common::envoy::cluster::EdsClusterConfig;

use crate::dag::{Dag, Service, UpstreamProtocol, Vertex};

/// The CDS cache.
pub type ClusterCache = super::ResourceCache<Cluster>;

/// Walks the DAG and materializes one EDS cluster per distinct upstream
/// service reference, keyed `<namespace>/<service>/<port-name-or-number>`.
pub fn visit_clusters(dag: &Dag) -> BTreeMap<String, Cluster> {
    let mut clusters = BTreeMap::new();
    for vertex in dag.roots() {
        for route in vertex.virtual_host().routes.values() {
            for service in &route.clusters {
                insert_cluster(&mut clusters, service);
            }
        }
        if let Vertex::SecureVirtualHost(svh) = vertex {
            for service in svh.tcp_proxy.iter().flat_map(|tp| &tp.services) {
                insert_cluster(&mut clusters, service);
            }
        }
    }
    clusters
}

fn insert_cluster(clusters: &mut BTreeMap<String, Cluster>, service: &Service) {
    let name = service.cluster_name();
    if clusters.contains_key(&name) {
        return;
    }
    clusters.insert(name, envoy_cluster(service));
}

fn envoy_cluster(service: &Service) -> Cluster {
    Cluster {
        name: service.cluster_name(),
        discovery_type: DiscoveryType::Eds,
        connect_timeout: Duration::from_millis(250),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: ConfigSource::grpc(XDS_CLUSTER),
            service_name: service.eds_name(),
        }),
        load_assignment: None,
        lb_policy: service.strategy,
        circuit_breakers: circuit_breakers(service),
        http2_protocol_options: match service.protocol {
            UpstreamProtocol::H2 | UpstreamProtocol::H2c => Some(Http2ProtocolOptions::default()),
            _ => None,
        },
        tls_context: match service.protocol {
            UpstreamProtocol::H2 | UpstreamProtocol::Tls => Some(UpstreamTlsContext::default()),
            _ => None,
        },
        health_checks: service
            .health_check
            .as_ref()
            .map(|hc| HealthCheck {
                timeout: hc.timeout,
                interval: hc.interval,
                unhealthy_threshold: hc.unhealthy_threshold,
                healthy_threshold: hc.healthy_threshold,
                http_health_check: HttpHealthCheck {
                    path: hc.path.clone(),
                    host: hc.host.clone(),
                },
            })
            .into_iter()
            .collect(),
    }
}

/// Circuit breaker thresholds from the Service annotations; `None` when
/// every knob is left at its default.
fn circuit_breakers(service: &Service) -> Option<CircuitBreakers> {
    if service.max_connections == 0
        && service.max_pending_requests == 0
        && service.max_requests == 0
        && service.max_retries == 0
    {
        return None;
    }
    Some(CircuitBreakers {
        thresholds: vec![Thresholds {
            priority: None,
            max_connections: service.max_connections,
            max_pending_requests: service.max_pending_requests,
            max_requests: service.max_requests,
            max_retries: service.max_retries,
        }],
    })
}
