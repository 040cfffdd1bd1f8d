//! The listener visitor (LDS)

use std::collections::BTreeMap;

use tracing::info;

use common::envoy::listener::{http_connection_manager, tcp_proxy};
use common::envoy::{
    socket_address, DownstreamTlsContext, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};

use crate::config::ListenerConfig;
use crate::dag::{Dag, SecureVirtualHost, TcpProxy, Vertex};

pub const ENVOY_HTTP_LISTENER: &str = "ingress_http";
pub const ENVOY_HTTPS_LISTENER: &str = "ingress_https";

/// The LDS cache.
pub type ListenerCache = super::ResourceCache<Listener>;

/// ALPN protocols offered on HTTPS filter chains.
const HTTPS_ALPN: &[&str] = &["h2", "http/1.1"];

/// Walks the DAG and materializes the listener set.
///
/// `ingress_http` exists iff at least one plain virtual host does;
/// `ingress_https` exists iff at least one secure virtual host contributed
/// a filter chain. Secure virtual hosts bound to a port other than 443 get
/// a dedicated `ingress_tcp_port_<N>` listener instead.
pub fn visit_listeners(dag: &Dag, config: &ListenerConfig) -> BTreeMap<String, Listener> {
    let mut listeners = BTreeMap::new();
    listeners.insert(
        ENVOY_HTTP_LISTENER.to_string(),
        Listener {
            name: ENVOY_HTTP_LISTENER.to_string(),
            address: socket_address(config.http_address(), config.http_port()),
            listener_filters: Vec::new(),
            filter_chains: vec![FilterChain {
                filters: vec![http_connection_manager(
                    ENVOY_HTTP_LISTENER,
                    config.http_access_log(),
                )],
                use_proxy_proto: config.use_proxy_proto,
                ..Default::default()
            }],
        },
    );
    listeners.insert(
        ENVOY_HTTPS_LISTENER.to_string(),
        Listener {
            name: ENVOY_HTTPS_LISTENER.to_string(),
            address: socket_address(config.https_address(), config.https_port()),
            listener_filters: vec![ListenerFilter::tls_inspector()],
            filter_chains: Vec::new(),
        },
    );

    let mut http = false;
    for vertex in dag.roots() {
        match vertex {
            Vertex::VirtualHost(_) => http = true,
            Vertex::SecureVirtualHost(svh) => visit_secure_vhost(&mut listeners, svh, config),
        }
    }

    if !http {
        listeners.remove(ENVOY_HTTP_LISTENER);
    }
    let https_empty = listeners
        .get(ENVOY_HTTPS_LISTENER)
        .map(|l| l.filter_chains.is_empty())
        .unwrap_or(true);
    if https_empty {
        listeners.remove(ENVOY_HTTPS_LISTENER);
    }
    listeners
}

fn visit_secure_vhost(
    listeners: &mut BTreeMap<String, Listener>,
    svh: &SecureVirtualHost,
    config: &ListenerConfig,
) {
    let host = &svh.virtual_host.host;
    if !svh.secret.is_present() {
        info!(host = %host, "skipping secure virtual host: missing or empty secret");
        return;
    }

    let port = svh.virtual_host.port;
    if port != 443 {
        let name = format!("ingress_tcp_port_{port}");
        info!(host = %host, port, listener = %name, "creating tcp virtual host");
        let filter = tcp_proxy(
            &name,
            tcp_clusters(svh.tcp_proxy.as_ref()),
            config.https_access_log(),
        );
        listeners.insert(
            name.clone(),
            Listener {
                name,
                address: socket_address("0.0.0.0", u32::from(port)),
                listener_filters: Vec::new(),
                filter_chains: vec![FilterChain {
                    tls_context: Some(DownstreamTlsContext::new(
                        &svh.secret.cert,
                        &svh.secret.key,
                        svh.min_proto_version,
                        &[],
                    )),
                    filters: vec![filter],
                    ..Default::default()
                }],
            },
        );
        return;
    }

    let (filters, alpn) = match &svh.tcp_proxy {
        Some(proxy) => (
            vec![tcp_proxy(
                ENVOY_HTTPS_LISTENER,
                tcp_clusters(Some(proxy)),
                config.https_access_log(),
            )],
            // L4 passthrough: do not offer ALPN
            &[][..],
        ),
        None => (
            vec![http_connection_manager(
                ENVOY_HTTPS_LISTENER,
                config.https_access_log(),
            )],
            HTTPS_ALPN,
        ),
    };

    let chain = FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            server_names: vec![host.clone()],
        }),
        tls_context: Some(DownstreamTlsContext::new(
            &svh.secret.cert,
            &svh.secret.key,
            svh.min_proto_version,
            alpn,
        )),
        use_proxy_proto: config.use_proxy_proto,
        filters,
    };
    if let Some(https) = listeners.get_mut(ENVOY_HTTPS_LISTENER) {
        https.filter_chains.push(chain);
    }
}

/// Weighted (name, weight) pairs for a TCP proxy. When every service left
/// its weight at zero, traffic splits evenly.
fn tcp_clusters(proxy: Option<&TcpProxy>) -> Vec<(String, u32)> {
    let Some(proxy) = proxy else {
        return Vec::new();
    };
    let all_zero = proxy.services.iter().all(|s| s.weight == 0);
    proxy
        .services
        .iter()
        .map(|s| {
            (
                s.cluster_name(),
                if all_zero { 1 } else { s.weight },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Route, Secret, Service, VirtualHost};
    use common::envoy::{FilterConfig, TlsProtocol};

    fn secret() -> Secret {
        Secret {
            namespace: "default".to_string(),
            name: "tls".to_string(),
            cert: b"certificate".to_vec(),
            key: b"key".to_vec(),
        }
    }

    fn service(name: &str) -> Service {
        Service {
            namespace: "default".to_string(),
            name: name.to_string(),
            port: 8080,
            ..Default::default()
        }
    }

    fn vhost(host: &str) -> VirtualHost {
        let mut vh = VirtualHost::new(host, 80);
        vh.add_route(Route {
            prefix: "/".to_string(),
            clusters: vec![service("kuard")],
            ..Default::default()
        });
        vh
    }

    fn svhost(host: &str, port: u16, tcp: Option<TcpProxy>) -> SecureVirtualHost {
        let mut vh = VirtualHost::new(host, port);
        if tcp.is_none() {
            vh.add_route(Route {
                prefix: "/".to_string(),
                clusters: vec![service("kuard")],
                ..Default::default()
            });
        }
        SecureVirtualHost {
            virtual_host: vh,
            secret: secret(),
            min_proto_version: TlsProtocol::V1_1,
            tcp_proxy: tcp,
        }
    }

    fn dag(roots: Vec<Vertex>) -> Dag {
        Dag::new(roots, Vec::new())
    }

    #[test]
    fn test_empty_dag_produces_no_listeners() {
        let listeners = visit_listeners(&dag(Vec::new()), &ListenerConfig::default());
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_virtual_host_produces_http_listener_only() {
        let listeners = visit_listeners(
            &dag(vec![Vertex::VirtualHost(vhost("example.com"))]),
            &ListenerConfig::default(),
        );
        assert_eq!(listeners.len(), 1);
        let http = &listeners[ENVOY_HTTP_LISTENER];
        assert_eq!(http.address.socket_address.address, "0.0.0.0");
        assert_eq!(http.address.socket_address.port_value, 8080);
        assert_eq!(http.filter_chains.len(), 1);
        assert!(!http.filter_chains[0].use_proxy_proto);
    }

    #[test]
    fn test_secure_virtual_host_appends_https_chain() {
        let listeners = visit_listeners(
            &dag(vec![Vertex::SecureVirtualHost(svhost(
                "example.com",
                443,
                None,
            ))]),
            &ListenerConfig::default(),
        );
        assert_eq!(listeners.len(), 1);
        let https = &listeners[ENVOY_HTTPS_LISTENER];
        assert_eq!(https.address.socket_address.port_value, 8443);
        assert_eq!(https.listener_filters[0].name, "envoy.listener.tls_inspector");
        assert_eq!(https.filter_chains.len(), 1);
        let chain = &https.filter_chains[0];
        assert_eq!(
            chain.filter_chain_match.as_ref().map(|m| m.server_names.clone()),
            Some(vec!["example.com".to_string()])
        );
        let tls = chain.tls_context.as_ref().expect("tls context");
        assert_eq!(
            tls.common_tls_context.alpn_protocols,
            vec!["h2".to_string(), "http/1.1".to_string()]
        );
        assert!(matches!(
            chain.filters[0].config,
            FilterConfig::HttpConnectionManager(_)
        ));
    }

    #[test]
    fn test_tcpproxy_chain_omits_alpn_and_uses_tcp_filter() {
        let listeners = visit_listeners(
            &dag(vec![Vertex::SecureVirtualHost(svhost(
                "example.com",
                443,
                Some(TcpProxy {
                    services: vec![service("tcpapp")],
                }),
            ))]),
            &ListenerConfig::default(),
        );
        let chain = &listeners[ENVOY_HTTPS_LISTENER].filter_chains[0];
        let tls = chain.tls_context.as_ref().expect("tls context");
        assert!(tls.common_tls_context.alpn_protocols.is_empty());
        assert_eq!(chain.filters[0].name, "envoy.tcp_proxy");
        match &chain.filters[0].config {
            FilterConfig::TcpProxy(config) => {
                assert_eq!(config.cluster.as_deref(), Some("default/tcpapp/8080"));
            }
            other => panic!("expected tcp proxy config, got {other:?}"),
        }
    }

    #[test]
    fn test_non_443_secure_vhost_gets_dedicated_tcp_listener() {
        let listeners = visit_listeners(
            &dag(vec![Vertex::SecureVirtualHost(svhost(
                "example.com",
                9443,
                Some(TcpProxy {
                    services: vec![service("tcpapp")],
                }),
            ))]),
            &ListenerConfig::default(),
        );
        assert_eq!(listeners.len(), 1);
        let listener = &listeners["ingress_tcp_port_9443"];
        assert_eq!(listener.address.socket_address.address, "0.0.0.0");
        assert_eq!(listener.address.socket_address.port_value, 9443);
        let chain = &listener.filter_chains[0];
        assert!(chain.filter_chain_match.is_none());
        let tls = chain.tls_context.as_ref().expect("tls context");
        assert!(tls.common_tls_context.alpn_protocols.is_empty());
        assert_eq!(chain.filters[0].name, "envoy.tcp_proxy");
    }

    #[test]
    fn test_min_proto_version_reaches_tls_context() {
        let mut svh = svhost("example.com", 443, None);
        svh.min_proto_version = TlsProtocol::V1_3;
        let listeners = visit_listeners(
            &dag(vec![Vertex::SecureVirtualHost(svh)]),
            &ListenerConfig::default(),
        );
        let tls = listeners[ENVOY_HTTPS_LISTENER].filter_chains[0]
            .tls_context
            .as_ref()
            .expect("tls context");
        assert_eq!(
            tls.common_tls_context.tls_params.tls_minimum_protocol_version,
            TlsProtocol::V1_3
        );
    }

    #[test]
    fn test_use_proxy_proto_marks_http_and_https_chains() {
        let config = ListenerConfig {
            use_proxy_proto: true,
            ..Default::default()
        };
        let listeners = visit_listeners(
            &dag(vec![
                Vertex::VirtualHost(vhost("example.com")),
                Vertex::SecureVirtualHost(svhost("example.com", 443, None)),
            ]),
            &config,
        );
        assert!(listeners[ENVOY_HTTP_LISTENER].filter_chains[0].use_proxy_proto);
        assert!(listeners[ENVOY_HTTPS_LISTENER].filter_chains[0].use_proxy_proto);
    }

    #[test]
    fn test_https_chains_follow_host_order() {
        let listeners = visit_listeners(
            &dag(vec![
                Vertex::SecureVirtualHost(svhost("alpha.example.com", 443, None)),
                Vertex::SecureVirtualHost(svhost("beta.example.com", 443, None)),
            ]),
            &ListenerConfig::default(),
        );
        let names: Vec<_> = listeners[ENVOY_HTTPS_LISTENER]
            .filter_chains
            .iter()
            .filter_map(|c| c.filter_chain_match.as_ref())
            .flat_map(|m| m.server_names.clone())
            .collect();
        assert_eq!(names, vec!["alpha.example.com", "beta.example.com"]);
    }

    #[test]
    fn test_listener_overrides_apply() {
        let config = ListenerConfig {
            http_address: "127.0.0.100".to_string(),
            http_port: 9100,
            ..Default::default()
        };
        let listeners = visit_listeners(
            &dag(vec![Vertex::VirtualHost(vhost("example.com"))]),
            &config,
        );
        let http = &listeners[ENVOY_HTTP_LISTENER];
        assert_eq!(http.address.socket_address.address, "127.0.0.100");
        assert_eq!(http.address.socket_address.port_value, 9100);
    }
}
