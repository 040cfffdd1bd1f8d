//! Rebuild orchestration
//!
//! Owns the object cache, the DAG builder, the four xDS caches and the
//! metrics surface. Every observed object change triggers a full rebuild:
//! cache snapshot → DAG → visitors → cache updates → status gauges.

use tracing::debug;

use crate::config::{ControllerConfig, ListenerConfig};
use crate::dag::{Builder, KubernetesCache, KubernetesObject};
use crate::error::Error;
use crate::metrics::{calculate_ingressroute_metric, Metrics};
use crate::xds::{
    visit_clusters, visit_endpoints, visit_listeners, visit_routes, ClusterCache, EndpointCache,
    ListenerCache, RouteCache,
};

pub struct Translator {
    builder: Builder,
    listener_config: ListenerConfig,
    pub listeners: ListenerCache,
    pub routes: RouteCache,
    pub clusters: ClusterCache,
    pub endpoints: EndpointCache,
    metrics: Metrics,
}

impl Translator {
    pub fn new(config: &ControllerConfig) -> Result<Translator, Error> {
        let cache = KubernetesCache::new(
            config.ingress_class.clone(),
            config.root_namespaces.clone(),
        );
        Ok(Translator {
            builder: Builder::new(cache),
            listener_config: config.listener.clone(),
            listeners: ListenerCache::new(),
            routes: RouteCache::new(),
            clusters: ClusterCache::new(),
            endpoints: EndpointCache::new(),
            metrics: Metrics::new()?,
        })
    }

    pub fn cache(&self) -> &KubernetesCache {
        &self.builder.source
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Applies an observed object revision. Rebuilds only when the cache
    /// contents actually changed.
    pub fn on_insert(&self, obj: KubernetesObject) {
        if self.builder.source.insert(obj) {
            self.rebuild();
        }
    }

    /// Applies an observed deletion. Rebuilds only when the object was
    /// present.
    pub fn on_remove(&self, obj: &KubernetesObject) {
        if self.builder.source.remove(obj) {
            self.rebuild();
        }
    }

    /// Recomputes the DAG and republishes every xDS cache and the status
    /// gauges.
    pub fn rebuild(&self) {
        let dag = self.builder.build();

        let listeners = visit_listeners(&dag, &self.listener_config);
        let routes = visit_routes(&dag);
        let clusters = visit_clusters(&dag);
        let endpoints = {
            let snapshot = self.builder.source.snapshot();
            visit_endpoints(&snapshot.endpoints)
        };

        debug!(
            listeners = listeners.len(),
            clusters = clusters.len(),
            endpoints = endpoints.len(),
            statuses = dag.statuses().len(),
            "rebuilt configuration"
        );

        self.listeners.update(listeners);
        self.routes.update(routes);
        self.clusters.update(clusters);
        self.endpoints.update(endpoints);

        self.metrics
            .set_ingressroute_metric(&calculate_ingressroute_metric(dag.statuses()));
    }

    /// Releases every waiting consumer. Called once on shutdown.
    pub fn shutdown(&self) {
        self.listeners.drain_waiters();
        self.routes.drain_waiters();
        self.clusters.drain_waiters();
        self.endpoints.drain_waiters();
    }
}
