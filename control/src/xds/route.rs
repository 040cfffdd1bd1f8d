//! The route visitor (RDS)

use std::collections::BTreeMap;

use common::envoy::route::{
    domains, HeaderValueOption, RedirectAction, RetryPolicy, Route, RouteAction,
    RouteConfiguration, RouteMatch, RoutePolicy, UpgradeConfig, VirtualHost, WeightedCluster,
    WeightedClusters,
};

use crate::dag::{self, Dag, Vertex};
use crate::xds::listener::{ENVOY_HTTP_LISTENER, ENVOY_HTTPS_LISTENER};

/// The RDS cache.
pub type RouteCache = super::ResourceCache<RouteConfiguration>;

/// Walks the DAG and materializes the two route configurations. Both are
/// always emitted; either may carry zero virtual hosts.
pub fn visit_routes(dag: &Dag) -> BTreeMap<String, RouteConfiguration> {
    let mut http_vhosts = Vec::new();
    let mut https_vhosts = Vec::new();

    for vertex in dag.roots() {
        match vertex {
            Vertex::VirtualHost(vh) => http_vhosts.push(envoy_virtual_host(vh, false)),
            Vertex::SecureVirtualHost(svh) => {
                // a TCP passthrough host carries no HTTP routes
                if svh.tcp_proxy.is_none() {
                    https_vhosts.push(envoy_virtual_host(&svh.virtual_host, true));
                }
            }
        }
    }

    let mut routes = BTreeMap::new();
    routes.insert(
        ENVOY_HTTP_LISTENER.to_string(),
        RouteConfiguration {
            name: ENVOY_HTTP_LISTENER.to_string(),
            virtual_hosts: http_vhosts,
        },
    );
    routes.insert(
        ENVOY_HTTPS_LISTENER.to_string(),
        RouteConfiguration {
            name: ENVOY_HTTPS_LISTENER.to_string(),
            virtual_hosts: https_vhosts,
        },
    );
    routes
}

fn envoy_virtual_host(vh: &dag::VirtualHost, secure: bool) -> VirtualHost {
    let mut ordered: Vec<&dag::Route> = vh.routes.values().collect();
    // longest prefix first so that more specific routes win
    ordered.sort_by(|a, b| {
        b.prefix
            .len()
            .cmp(&a.prefix.len())
            .then_with(|| a.prefix.cmp(&b.prefix))
    });

    let mut hsts = false;
    let routes = ordered
        .into_iter()
        .map(|route| {
            if route.https_upgrade {
                hsts = true;
            }
            let action = if route.https_upgrade && !secure {
                RouteAction::Redirect(RedirectAction {
                    https_redirect: true,
                })
            } else {
                RouteAction::Route(forward_action(route))
            };
            Route {
                match_: RouteMatch {
                    prefix: route.prefix.clone(),
                },
                action,
            }
        })
        .collect();

    VirtualHost {
        name: vh.host.clone(),
        domains: domains(&vh.host),
        routes,
        response_headers_to_add: if secure && hsts {
            vec![HeaderValueOption::new(
                "Strict-Transport-Security",
                "max-age=31536000; includeSubDomains",
            )]
        } else {
            Vec::new()
        },
    }
}

fn forward_action(route: &dag::Route) -> RoutePolicy {
    let mut policy = RoutePolicy {
        timeout: route.timeout,
        prefix_rewrite: route.prefix_rewrite.clone(),
        upgrade_configs: if route.websocket {
            vec![UpgradeConfig::websocket()]
        } else {
            Vec::new()
        },
        retry_policy: route.retry_policy.as_ref().map(|rp| RetryPolicy {
            retry_on: rp.retry_on.clone(),
            num_retries: rp.num_retries,
            per_try_timeout: rp.per_try_timeout,
        }),
        ..Default::default()
    };

    match route.clusters.len() {
        0 => {}
        1 => policy.cluster = Some(route.clusters[0].cluster_name()),
        _ => {
            let all_zero = route.clusters.iter().all(|s| s.weight == 0);
            let mut clusters: Vec<WeightedCluster> = route
                .clusters
                .iter()
                .map(|s| WeightedCluster {
                    name: s.cluster_name(),
                    weight: if all_zero { 1 } else { s.weight },
                })
                .collect();
            clusters.sort_by(|a, b| a.name.cmp(&b.name));
            let total_weight = clusters.iter().map(|c| c.weight).sum();
            policy.weighted_clusters = Some(WeightedClusters {
                clusters,
                total_weight,
            });
        }
    }
    policy
}
