//! The endpoint visitor (EDS)
//!
//! A pure projection of Endpoints objects into ClusterLoadAssignments;
//! the DAG is not consulted.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::Endpoints;

use common::envoy::endpoint::lb_endpoint;
use common::envoy::{ClusterLoadAssignment, LocalityLbEndpoints};

use crate::dag::Meta;

/// The EDS cache.
pub type EndpointCache = super::ResourceCache<ClusterLoadAssignment>;

/// Emits one ClusterLoadAssignment per Endpoints object, named
/// `<namespace>/<name>`, listing every subset's address/port combinations.
pub fn visit_endpoints(endpoints: &HashMap<Meta, Endpoints>) -> BTreeMap<String, ClusterLoadAssignment> {
    let mut sorted: Vec<(&Meta, &Endpoints)> = endpoints.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut assignments = BTreeMap::new();
    for (meta, ep) in sorted {
        let name = format!("{}/{}", meta.namespace, meta.name);
        let mut localities = Vec::new();
        for subset in ep.subsets.iter().flatten() {
            let mut lb_endpoints = Vec::new();
            for address in subset.addresses.iter().flatten() {
                for port in subset.ports.iter().flatten() {
                    lb_endpoints.push(lb_endpoint(address.ip.clone(), port.port as u32));
                }
            }
            if !lb_endpoints.is_empty() {
                localities.push(LocalityLbEndpoints { lb_endpoints });
            }
        }
        assignments.insert(
            name.clone(),
            ClusterLoadAssignment {
                cluster_name: name,
                endpoints: localities,
            },
        );
    }
    assignments
}
