//! DAG construction
//!
//! `Builder::build` is a pure function from one consistent snapshot of the
//! object cache to a new DAG. Partial failures degrade the output (the
//! offending object is excluded and its status recorded); the build itself
//! always produces a DAG.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use k8s_openapi::api::networking::v1::IngressBackend;
use tracing::{debug, info};

use common::envoy::{LbPolicy, TlsProtocol};
use common::ingressroute as api;
use common::IngressRoute;

use crate::dag::annotations::{self, compat_annotation, Annotations};
use crate::dag::cache::{KubernetesCache, Snapshot};
use crate::dag::{
    Dag, HealthCheckPolicy, Meta, RetryPolicy, Route, Secret, SecureVirtualHost, Service, Status,
    StatusKind, TcpProxy, Vertex, VirtualHost,
};

/// Builds DAGs from the shared object cache.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    pub source: KubernetesCache,
}

impl Builder {
    pub fn new(source: KubernetesCache) -> Builder {
        Builder { source }
    }

    /// Computes a new DAG from the current cache contents. Executes under
    /// the cache read lock; concurrent writers wait until the build is done.
    pub fn build(&self) -> Dag {
        let snapshot = self.source.snapshot();
        BuildContext::new(&snapshot, self.source.root_namespaces()).compute()
    }
}

/// How a route entry names the service port.
#[derive(Clone, Copy)]
enum PortRef<'a> {
    Name(&'a str),
    Number(i32),
}

struct BuildContext<'a> {
    source: &'a Snapshot,
    root_namespaces: &'a [String],
    vhosts: BTreeMap<(String, u16), VirtualHost>,
    svhosts: BTreeMap<(String, u16), SecureVirtualHost>,
    // first status recorded for an object wins
    statuses: HashMap<Meta, Status>,
}

impl<'a> BuildContext<'a> {
    fn new(source: &'a Snapshot, root_namespaces: &'a [String]) -> BuildContext<'a> {
        BuildContext {
            source,
            root_namespaces,
            vhosts: BTreeMap::new(),
            svhosts: BTreeMap::new(),
            statuses: HashMap::new(),
        }
    }

    fn compute(mut self) -> Dag {
        self.setup_secure_virtual_hosts();
        self.compute_ingresses();
        self.compute_ingressroutes();
        self.finalize()
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    /// First ingress pass: create a secure virtual host for every TLS entry
    /// whose secret resolves with usable key material.
    fn setup_secure_virtual_hosts(&mut self) {
        let source = self.source;
        for (meta, ing) in sorted(&source.ingresses) {
            let empty = Annotations::new();
            let ann = ing.metadata.annotations.as_ref().unwrap_or(&empty);
            let min_proto = TlsProtocol::from_config_value(
                compat_annotation(ann, "tls-minimum-protocol-version").unwrap_or(""),
            );
            let Some(spec) = &ing.spec else { continue };
            for tls in spec.tls.iter().flatten() {
                let Some(name) = tls.secret_name.as_deref().filter(|s| !s.is_empty()) else {
                    continue;
                };
                let secret_meta = Meta::new(meta.namespace.clone(), name);
                let Some(secret) = self.lookup_secret(&secret_meta) else {
                    info!(
                        secret = %secret_meta,
                        ingress = %meta,
                        "skipping TLS section: secret missing or empty"
                    );
                    continue;
                };
                for host in tls.hosts.iter().flatten().filter(|h| !h.is_empty()) {
                    self.ensure_svhost(host, 443, secret.clone(), min_proto);
                }
            }
        }
    }

    /// Second ingress pass: deconstruct each ingress into routes.
    fn compute_ingresses(&mut self) {
        let source = self.source;
        for (meta, ing) in sorted(&source.ingresses) {
            let empty = Annotations::new();
            let ann = ing.metadata.annotations.as_ref().unwrap_or(&empty);
            let http_allowed = annotations::http_allowed(ann);
            let https_upgrade = annotations::tls_required(ann);
            let websockets = annotations::websocket_routes(ann);
            let timeout = annotations::response_timeout(ann);
            let retry_policy = annotations::retry_on(ann).map(|retry_on| RetryPolicy {
                retry_on: retry_on.to_string(),
                num_retries: annotations::num_retries(ann),
                per_try_timeout: annotations::per_try_timeout(ann),
            });
            let Some(spec) = &ing.spec else { continue };

            if let Some(backend) = &spec.default_backend {
                if let Some(service) = self.lookup_ingress_backend(&meta.namespace, backend) {
                    let route = Route {
                        prefix: "/".to_string(),
                        clusters: vec![service],
                        websocket: websockets.contains("/"),
                        timeout,
                        retry_policy: retry_policy.clone(),
                        prefix_rewrite: None,
                        https_upgrade,
                    };
                    if http_allowed {
                        self.vhost("*", 80).add_route(route);
                    }
                }
            }

            for rule in spec.rules.iter().flatten() {
                let host = rule.host.as_deref().filter(|h| !h.is_empty()).unwrap_or("*");
                for path in rule.http.iter().flat_map(|h| &h.paths) {
                    let prefix = path.path.as_deref().filter(|p| !p.is_empty()).unwrap_or("/");
                    let Some(service) =
                        self.lookup_ingress_backend(&meta.namespace, &path.backend)
                    else {
                        debug!(
                            ingress = %meta,
                            path = prefix,
                            "skipping route: backend service not resolvable"
                        );
                        continue;
                    };
                    let route = Route {
                        prefix: prefix.to_string(),
                        clusters: vec![service],
                        websocket: websockets.contains(prefix),
                        timeout,
                        retry_policy: retry_policy.clone(),
                        prefix_rewrite: None,
                        https_upgrade,
                    };
                    if http_allowed {
                        self.vhost(host, 80).add_route(route.clone());
                    }
                    if let Some(svh) = self.svhosts.get_mut(&(host.to_string(), 443)) {
                        svh.virtual_host.add_route(route);
                    }
                }
            }
        }
    }

    fn lookup_ingress_backend(&self, namespace: &str, backend: &IngressBackend) -> Option<Service> {
        let service = backend.service.as_ref()?;
        let port = service.port.as_ref()?;
        let port_ref = match (&port.name, port.number) {
            (Some(name), _) => PortRef::Name(name),
            (None, Some(number)) => PortRef::Number(number),
            (None, None) => return None,
        };
        self.lookup_service(&Meta::new(namespace, service.name.clone()), port_ref)
    }

    // ------------------------------------------------------------------
    // IngressRoute
    // ------------------------------------------------------------------

    fn compute_ingressroutes(&mut self) {
        let source = self.source;
        let mut fqdn_owner: HashMap<String, Meta> = HashMap::new();

        for (meta, ir) in sorted(&source.ingressroutes) {
            let Some(vhost) = &ir.spec.virtualhost else {
                // candidate orphan; a delegation chain may still reach it
                continue;
            };

            if !self.root_namespaces.is_empty()
                && !self.root_namespaces.iter().any(|ns| ns == &meta.namespace)
            {
                self.set_status(
                    meta.clone(),
                    StatusKind::Invalid,
                    "root IngressRoute cannot be defined in this namespace".to_string(),
                    "",
                    true,
                );
                continue;
            }

            if vhost.fqdn.is_empty() {
                self.set_status(
                    meta.clone(),
                    StatusKind::Invalid,
                    "Spec.VirtualHost.Fqdn must be specified".to_string(),
                    "",
                    true,
                );
                continue;
            }
            let host = vhost.fqdn.clone();

            if let Some(owner) = fqdn_owner.get(&host) {
                self.set_status(
                    meta.clone(),
                    StatusKind::Invalid,
                    format!("fqdn \"{host}\" is already claimed by IngressRoute \"{owner}\""),
                    &host,
                    true,
                );
                continue;
            }
            fqdn_owner.insert(host.clone(), meta.clone());

            let port = vhost.port.unwrap_or(443);
            if !(1..=65535).contains(&port) {
                self.set_status(
                    meta.clone(),
                    StatusKind::Invalid,
                    format!("Spec.VirtualHost.Port \"{port}\" must be in the range 1-65535"),
                    &host,
                    true,
                );
                continue;
            }
            let port = port as u16;

            let mut enforce_tls = false;
            if let Some(tls) = &vhost.tls {
                let secret_meta = Meta::new(meta.namespace.clone(), tls.secret_name.clone());
                match self.lookup_secret(&secret_meta) {
                    Some(secret) => {
                        let min_proto = TlsProtocol::from_config_value(
                            tls.minimum_protocol_version.as_deref().unwrap_or(""),
                        );
                        self.ensure_svhost(&host, port, secret, min_proto);
                        enforce_tls = true;
                    }
                    None => info!(
                        secret = %secret_meta,
                        ingressroute = %meta,
                        "skipping secure virtual host: secret missing or empty"
                    ),
                }
            }

            if let Some(tcpproxy) = &ir.spec.tcpproxy {
                if !self.process_tcpproxy(meta, tcpproxy, &host, enforce_tls) {
                    continue;
                }
            }

            self.process_routes(ir, "", &[], &host, enforce_tls);
        }

        // everything not reached from a root is orphaned
        for (meta, _) in sorted(&source.ingressroutes) {
            if !self.statuses.contains_key(meta) {
                self.statuses.insert(
                    meta.clone(),
                    Status {
                        meta: meta.clone(),
                        kind: StatusKind::Orphaned,
                        description:
                            "this IngressRoute is not part of a delegation chain from a root IngressRoute"
                                .to_string(),
                        vhost: String::new(),
                        root: false,
                    },
                );
            }
        }
    }

    /// Walks the routes of one IngressRoute, following delegation edges
    /// depth-first. `visited` is the path of documents leading here; a
    /// delegate edge back onto the path is a cycle and invalidates the
    /// document holding the edge.
    fn process_routes(
        &mut self,
        ir: &IngressRoute,
        prefix_match: &str,
        visited: &[Meta],
        host: &str,
        enforce_tls: bool,
    ) {
        let meta = ir_meta(ir);
        let is_root = ir.spec.virtualhost.is_some();
        let mut path = visited.to_vec();
        path.push(meta.clone());

        for route in &ir.spec.routes {
            let prefix = route.match_.as_str();

            if !route.services.is_empty() && route.delegate.is_some() {
                self.set_status(
                    &meta,
                    StatusKind::Invalid,
                    format!(
                        "route \"{prefix}\": cannot specify services and delegate in the same route"
                    ),
                    host,
                    is_root,
                );
                return;
            }
            if route.services.is_empty() && route.delegate.is_none() {
                self.set_status(
                    &meta,
                    StatusKind::Invalid,
                    format!("route \"{prefix}\": must specify either services or delegate"),
                    host,
                    is_root,
                );
                return;
            }

            if !prefix.starts_with(prefix_match) {
                self.set_status(
                    &meta,
                    StatusKind::Invalid,
                    format!(
                        "the path prefix \"{prefix}\" does not match the parent's path prefix \"{prefix_match}\""
                    ),
                    host,
                    is_root,
                );
                return;
            }

            if !route.services.is_empty() {
                let mut r = Route {
                    prefix: prefix.to_string(),
                    clusters: Vec::new(),
                    websocket: route.enable_websockets,
                    timeout: route
                        .timeout_policy
                        .as_ref()
                        .and_then(|tp| annotations::parse_timeout(Some(&tp.request))),
                    retry_policy: route.retry_policy.as_ref().map(|rp| RetryPolicy {
                        retry_on: "5xx".to_string(),
                        num_retries: rp.num_retries,
                        per_try_timeout: annotations::parse_timeout(rp.per_try_timeout.as_deref()),
                    }),
                    prefix_rewrite: route.prefix_rewrite.clone(),
                    https_upgrade: false,
                };
                for service in &route.services {
                    match self.resolve_route_service(&meta.namespace, service) {
                        Ok(s) => r.clusters.push(s),
                        Err(description) => {
                            self.set_status(
                                &meta,
                                StatusKind::Invalid,
                                format!("route \"{prefix}\": {description}"),
                                host,
                                is_root,
                            );
                            return;
                        }
                    }
                }
                self.add_ingressroute_route(host, r, enforce_tls);
                continue;
            }

            // the route delegates; follow the edge if the target exists
            let Some(delegate) = route.delegate.as_ref() else {
                continue;
            };
            let namespace = delegate
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| meta.namespace.clone());
            let delegate_meta = Meta::new(namespace, delegate.name.clone());

            if let Some(dest) = self.source.ingressroutes.get(&delegate_meta) {
                if path.contains(&delegate_meta) {
                    let mut cycle: Vec<String> = path.iter().map(Meta::to_string).collect();
                    cycle.push(delegate_meta.to_string());
                    self.set_status(
                        &meta,
                        StatusKind::Invalid,
                        format!("route creates a delegation cycle: {}", cycle.join(" -> ")),
                        host,
                        is_root,
                    );
                    return;
                }
                self.process_routes(dest, prefix, &path, host, enforce_tls);
            }
        }

        self.set_status(
            &meta,
            StatusKind::Valid,
            "valid IngressRoute".to_string(),
            host,
            is_root,
        );
    }

    /// Validates a route's service reference and projects it to a cluster.
    fn resolve_route_service(
        &self,
        namespace: &str,
        service: &api::Service,
    ) -> Result<Service, String> {
        if !(1..=65535).contains(&service.port) {
            return Err(format!(
                "service \"{}\": port must be in the range 1-65535",
                service.name
            ));
        }
        if service.weight < 0 {
            return Err(format!(
                "service \"{}\": weight must be greater than or equal to zero",
                service.name
            ));
        }
        let meta = Meta::new(namespace, service.name.clone());
        let mut s = self
            .lookup_service(&meta, PortRef::Number(service.port))
            .ok_or_else(|| {
                format!(
                    "service \"{}\": port \"{}\" not found",
                    service.name, service.port
                )
            })?;
        s.weight = service.weight as u32;
        s.strategy = lb_strategy(service.strategy.as_deref());
        s.health_check = health_check_policy(service.health_check.as_ref());
        Ok(s)
    }

    fn process_tcpproxy(
        &mut self,
        meta: &Meta,
        tcpproxy: &api::TcpProxy,
        host: &str,
        enforce_tls: bool,
    ) -> bool {
        if !enforce_tls {
            self.set_status(
                meta.clone(),
                StatusKind::Invalid,
                "Spec.TCPProxy requires Spec.VirtualHost.TLS".to_string(),
                host,
                true,
            );
            return false;
        }
        let mut services = Vec::new();
        for service in &tcpproxy.services {
            match self.resolve_route_service(&meta.namespace, service) {
                Ok(s) => services.push(s),
                Err(description) => {
                    self.set_status(
                        meta.clone(),
                        StatusKind::Invalid,
                        format!("tcpproxy: {description}"),
                        host,
                        true,
                    );
                    return false;
                }
            }
        }
        if let Some(svh) = self.secure_vhost_mut(host) {
            svh.tcp_proxy = Some(TcpProxy { services });
        }
        true
    }

    // ------------------------------------------------------------------
    // Shared lookups
    // ------------------------------------------------------------------

    /// Resolves a Service reference to a cluster, projecting the upstream
    /// protocol and circuit breaker annotations off the Service object.
    fn lookup_service(&self, meta: &Meta, port: PortRef<'_>) -> Option<Service> {
        let svc = self.source.services.get(meta)?;
        let ports = svc.spec.as_ref()?.ports.as_ref()?;
        let matched = ports.iter().find(|p| match port {
            PortRef::Name(name) => p.name.as_deref() == Some(name),
            PortRef::Number(number) => p.port == number,
        })?;

        let empty = Annotations::new();
        let ann = svc.metadata.annotations.as_ref().unwrap_or(&empty);
        let protocols = annotations::parse_upstream_protocols(ann);
        let protocol = matched
            .name
            .as_ref()
            .and_then(|name| protocols.get(name))
            .or_else(|| protocols.get(&matched.port.to_string()))
            .copied()
            .unwrap_or_default();

        Some(Service {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            port: matched.port as u16,
            port_name: matched.name.clone().unwrap_or_default(),
            weight: 0,
            protocol,
            strategy: LbPolicy::RoundRobin,
            health_check: None,
            max_connections: annotations::max_connections(ann),
            max_pending_requests: annotations::max_pending_requests(ann),
            max_requests: annotations::max_requests(ann),
            max_retries: annotations::max_retries(ann),
        })
    }

    /// Resolves a TLS secret; `None` when absent or missing key material.
    fn lookup_secret(&self, meta: &Meta) -> Option<Secret> {
        let secret = self.source.secrets.get(meta)?;
        let data = secret.data.as_ref()?;
        let cert = data.get("tls.crt")?.0.clone();
        let key = data.get("tls.key")?.0.clone();
        let secret = Secret {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            cert,
            key,
        };
        secret.is_present().then_some(secret)
    }

    // ------------------------------------------------------------------
    // Vertex bookkeeping
    // ------------------------------------------------------------------

    fn vhost(&mut self, host: &str, port: u16) -> &mut VirtualHost {
        self.vhosts
            .entry((host.to_string(), port))
            .or_insert_with(|| VirtualHost::new(host, port))
    }

    fn ensure_svhost(&mut self, host: &str, port: u16, secret: Secret, min_proto: TlsProtocol) {
        match self.svhosts.get_mut(&(host.to_string(), port)) {
            Some(existing) => {
                existing.secret = secret;
                existing.min_proto_version = min_proto;
            }
            None => {
                self.svhosts.insert(
                    (host.to_string(), port),
                    SecureVirtualHost {
                        virtual_host: VirtualHost::new(host, port),
                        secret,
                        min_proto_version: min_proto,
                        tcp_proxy: None,
                    },
                );
            }
        }
    }

    fn secure_vhost_mut(&mut self, host: &str) -> Option<&mut SecureVirtualHost> {
        self.svhosts
            .iter_mut()
            .find(|((h, _), _)| h == host)
            .map(|(_, svh)| svh)
    }

    fn add_ingressroute_route(&mut self, host: &str, route: Route, enforce_tls: bool) {
        if enforce_tls {
            if let Some(svh) = self.secure_vhost_mut(host) {
                svh.virtual_host.add_route(route.clone());
            }
        }
        self.vhost(host, 80).add_route(route);
    }

    fn set_status(
        &mut self,
        meta: impl std::borrow::Borrow<Meta>,
        kind: StatusKind,
        description: String,
        vhost: &str,
        root: bool,
    ) {
        let meta = meta.borrow().clone();
        self.statuses.entry(meta.clone()).or_insert(Status {
            meta,
            kind,
            description,
            vhost: vhost.to_string(),
            root,
        });
    }

    fn finalize(self) -> Dag {
        let mut roots: Vec<Vertex> = Vec::new();
        for vh in self.vhosts.into_values() {
            if !vh.routes.is_empty() {
                roots.push(Vertex::VirtualHost(vh));
            }
        }
        for svh in self.svhosts.into_values() {
            if svh.virtual_host.routes.is_empty() && svh.tcp_proxy.is_none() {
                continue;
            }
            roots.push(Vertex::SecureVirtualHost(svh));
        }
        roots.sort_by(|a, b| (a.host(), a.port()).cmp(&(b.host(), b.port())));

        let mut statuses: Vec<Status> = self.statuses.into_values().collect();
        statuses.sort_by(|a, b| a.meta.cmp(&b.meta));

        Dag::new(roots, statuses)
    }
}

fn ir_meta(ir: &IngressRoute) -> Meta {
    crate::dag::cache::meta_of(&ir.metadata)
}

fn lb_strategy(strategy: Option<&str>) -> LbPolicy {
    match strategy {
        Some("WeightedLeastRequest") => LbPolicy::LeastRequest,
        Some("Random") => LbPolicy::Random,
        Some("RingHash") => LbPolicy::RingHash,
        Some("Maglev") => LbPolicy::Maglev,
        _ => LbPolicy::RoundRobin,
    }
}

fn health_check_policy(hc: Option<&api::HealthCheck>) -> Option<HealthCheckPolicy> {
    let hc = hc?;
    Some(HealthCheckPolicy {
        path: hc.path.clone(),
        host: hc
            .host
            .clone()
            .unwrap_or_else(|| "trellis-envoy-healthcheck".to_string()),
        interval: Duration::from_secs(hc.interval_seconds.unwrap_or(10).max(1) as u64),
        timeout: Duration::from_secs(hc.timeout_seconds.unwrap_or(2).max(1) as u64),
        unhealthy_threshold: hc.unhealthy_threshold_count.unwrap_or(3),
        healthy_threshold: hc.healthy_threshold_count.unwrap_or(2),
    })
}

fn sorted<T>(map: &HashMap<Meta, T>) -> Vec<(&Meta, &T)> {
    let mut items: Vec<_> = map.iter().collect();
    items.sort_by(|a, b| a.0.cmp(b.0));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::cache::KubernetesObject;
    use k8s_openapi::api::core::v1::{Secret as CoreSecret, Service as CoreService, ServicePort, ServiceSpec};
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressRule, IngressServiceBackend,
        IngressSpec, IngressTLS, ServiceBackendPort,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn core_service(namespace: &str, name: &str, port: i32) -> KubernetesObject {
        KubernetesObject::Service(Box::new(CoreService {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn tls_secret(namespace: &str, name: &str) -> KubernetesObject {
        let mut data = BTreeMap::new();
        data.insert("tls.crt".to_string(), ByteString(b"certificate".to_vec()));
        data.insert("tls.key".to_string(), ByteString(b"key".to_vec()));
        KubernetesObject::Secret(Box::new(CoreSecret {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(data),
            ..Default::default()
        }))
    }

    fn ingressroute(namespace: &str, name: &str, spec: api::IngressRouteSpec) -> KubernetesObject {
        let mut ir = IngressRoute::new(name, spec);
        ir.metadata.namespace = Some(namespace.to_string());
        KubernetesObject::IngressRoute(Box::new(ir))
    }

    fn root_spec(fqdn: &str, routes: Vec<api::Route>) -> api::IngressRouteSpec {
        api::IngressRouteSpec {
            virtualhost: Some(api::VirtualHost {
                fqdn: fqdn.to_string(),
                ..Default::default()
            }),
            routes,
            tcpproxy: None,
        }
    }

    fn service_route(prefix: &str, service: &str, port: i32) -> api::Route {
        api::Route {
            match_: prefix.to_string(),
            services: vec![api::Service {
                name: service.to_string(),
                port,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn delegate_route(prefix: &str, name: &str) -> api::Route {
        api::Route {
            match_: prefix.to_string(),
            delegate: Some(api::Delegate {
                name: name.to_string(),
                namespace: None,
            }),
            ..Default::default()
        }
    }

    fn ingress(namespace: &str, name: &str, host: &str, service: &str, port: i32) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(host.to_string()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: k8s_openapi::api::networking::v1::IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: service.to_string(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(port),
                                        name: None,
                                    }),
                                }),
                                resource: None,
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build(objects: Vec<KubernetesObject>) -> Dag {
        build_with_roots(objects, Vec::new())
    }

    fn build_with_roots(objects: Vec<KubernetesObject>, root_namespaces: Vec<String>) -> Dag {
        let cache = KubernetesCache::new(None, root_namespaces);
        for obj in objects {
            cache.insert(obj);
        }
        Builder::new(cache).build()
    }

    #[test]
    fn test_valid_ingressroute_produces_virtual_host() {
        let dag = build(vec![
            core_service("roots", "home", 8080),
            ingressroute(
                "roots",
                "example",
                root_spec("example.com", vec![service_route("/foo", "home", 8080)]),
            ),
        ]);

        let vhosts: Vec<_> = dag.virtual_hosts().collect();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(vhosts[0].host, "example.com");
        let route = &vhosts[0].routes["/foo"];
        assert_eq!(route.clusters.len(), 1);
        assert_eq!(route.clusters[0].cluster_name(), "roots/home/http");

        assert_eq!(dag.statuses().len(), 1);
        assert_eq!(dag.statuses()[0].kind, StatusKind::Valid);
        assert!(dag.statuses()[0].root);
    }

    #[test]
    fn test_builds_are_deterministic() {
        let objects = || {
            vec![
                core_service("roots", "home", 8080),
                core_service("roots", "blog", 8000),
                ingressroute(
                    "roots",
                    "example",
                    root_spec(
                        "example.com",
                        vec![
                            service_route("/foo", "home", 8080),
                            service_route("/blog", "blog", 8000),
                        ],
                    ),
                ),
            ]
        };
        assert_eq!(build(objects()), build(objects()));
    }

    #[test]
    fn test_reinserting_is_idempotent() {
        let cache = KubernetesCache::default();
        let insert = |cache: &KubernetesCache| {
            cache.insert(core_service("roots", "home", 8080));
            cache.insert(ingressroute(
                "roots",
                "example",
                root_spec("example.com", vec![service_route("/foo", "home", 8080)]),
            ));
        };
        insert(&cache);
        let first = Builder::new(cache.clone()).build();
        insert(&cache);
        let second = Builder::new(cache).build();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolvable_service_invalidates_route_owner() {
        let dag = build(vec![ingressroute(
            "roots",
            "example",
            root_spec("example.com", vec![service_route("/foo", "missing", 8080)]),
        )]);
        assert!(dag.virtual_hosts().next().is_none());
        assert_eq!(dag.statuses()[0].kind, StatusKind::Invalid);
        assert_eq!(dag.statuses()[0].vhost, "example.com");
    }

    #[test]
    fn test_delegated_routes_land_under_root_vhost() {
        let dag = build(vec![
            core_service("roots", "home", 8080),
            ingressroute(
                "roots",
                "example",
                root_spec("example.com", vec![delegate_route("/foo", "child")]),
            ),
            ingressroute(
                "roots",
                "child",
                api::IngressRouteSpec {
                    routes: vec![service_route("/foo/bar", "home", 8080)],
                    ..Default::default()
                },
            ),
        ]);

        let vhosts: Vec<_> = dag.virtual_hosts().collect();
        assert_eq!(vhosts.len(), 1);
        assert!(vhosts[0].routes.contains_key("/foo/bar"));
        assert!(dag
            .statuses()
            .iter()
            .all(|s| s.kind == StatusKind::Valid));
        // only the root carries the root marker
        assert_eq!(dag.statuses().iter().filter(|s| s.root).count(), 1);
    }

    #[test]
    fn test_cross_namespace_delegation() {
        let dag = build(vec![
            core_service("teams", "home", 8080),
            ingressroute(
                "roots",
                "example",
                root_spec(
                    "example.com",
                    vec![api::Route {
                        match_: "/foo".to_string(),
                        delegate: Some(api::Delegate {
                            name: "child".to_string(),
                            namespace: Some("teams".to_string()),
                        }),
                        ..Default::default()
                    }],
                ),
            ),
            ingressroute(
                "teams",
                "child",
                api::IngressRouteSpec {
                    routes: vec![service_route("/foo", "home", 8080)],
                    ..Default::default()
                },
            ),
        ]);
        let vhosts: Vec<_> = dag.virtual_hosts().collect();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(
            vhosts[0].routes["/foo"].clusters[0].cluster_name(),
            "teams/home/http"
        );
    }

    #[test]
    fn test_duplicate_fqdn_marks_later_root_invalid() {
        let dag = build(vec![
            core_service("roots", "home", 8080),
            ingressroute(
                "roots",
                "alpha",
                root_spec("example.com", vec![service_route("/", "home", 8080)]),
            ),
            ingressroute(
                "roots",
                "beta",
                root_spec("example.com", vec![service_route("/", "home", 8080)]),
            ),
        ]);
        let by_name: HashMap<_, _> = dag
            .statuses()
            .iter()
            .map(|s| (s.meta.name.clone(), s))
            .collect();
        assert_eq!(by_name["alpha"].kind, StatusKind::Valid);
        assert_eq!(by_name["beta"].kind, StatusKind::Invalid);
        assert!(by_name["beta"].description.contains("already claimed"));
    }

    #[test]
    fn test_secure_vhost_requires_resolvable_secret() {
        let spec = api::IngressRouteSpec {
            virtualhost: Some(api::VirtualHost {
                fqdn: "example.com".to_string(),
                port: None,
                tls: Some(api::Tls {
                    secret_name: "example-tls".to_string(),
                    minimum_protocol_version: None,
                }),
            }),
            routes: vec![service_route("/", "home", 8080)],
            tcpproxy: None,
        };

        // secret absent: routes still serve insecure, no secure vhost
        let dag = build(vec![
            core_service("roots", "home", 8080),
            ingressroute("roots", "example", spec.clone()),
        ]);
        assert_eq!(dag.virtual_hosts().count(), 1);
        assert_eq!(dag.secure_virtual_hosts().count(), 0);

        // with the secret both sides exist
        let dag = build(vec![
            core_service("roots", "home", 8080),
            tls_secret("roots", "example-tls"),
            ingressroute("roots", "example", spec),
        ]);
        assert_eq!(dag.virtual_hosts().count(), 1);
        let svhosts: Vec<_> = dag.secure_virtual_hosts().collect();
        assert_eq!(svhosts.len(), 1);
        assert_eq!(svhosts[0].virtual_host.port, 443);
        assert!(svhosts[0].virtual_host.routes.contains_key("/"));
    }

    #[test]
    fn test_secure_vhost_honours_custom_port_and_min_proto() {
        let dag = build(vec![
            core_service("roots", "home", 8080),
            tls_secret("roots", "example-tls"),
            ingressroute(
                "roots",
                "example",
                api::IngressRouteSpec {
                    virtualhost: Some(api::VirtualHost {
                        fqdn: "example.com".to_string(),
                        port: Some(9443),
                        tls: Some(api::Tls {
                            secret_name: "example-tls".to_string(),
                            minimum_protocol_version: Some("1.3".to_string()),
                        }),
                    }),
                    routes: vec![service_route("/", "home", 8080)],
                    tcpproxy: None,
                },
            ),
        ]);
        let svhosts: Vec<_> = dag.secure_virtual_hosts().collect();
        assert_eq!(svhosts[0].virtual_host.port, 9443);
        assert_eq!(svhosts[0].min_proto_version, TlsProtocol::V1_3);
    }

    #[test]
    fn test_tcpproxy_requires_tls() {
        let dag = build(vec![
            core_service("roots", "tcpapp", 9000),
            ingressroute(
                "roots",
                "example",
                api::IngressRouteSpec {
                    virtualhost: Some(api::VirtualHost {
                        fqdn: "example.com".to_string(),
                        ..Default::default()
                    }),
                    routes: Vec::new(),
                    tcpproxy: Some(api::TcpProxy {
                        services: vec![api::Service {
                            name: "tcpapp".to_string(),
                            port: 9000,
                            ..Default::default()
                        }],
                    }),
                },
            ),
        ]);
        assert_eq!(dag.statuses()[0].kind, StatusKind::Invalid);
        assert!(dag.statuses()[0].description.contains("TLS"));
    }

    #[test]
    fn test_tcpproxy_attaches_to_secure_vhost() {
        let dag = build(vec![
            core_service("roots", "tcpapp", 9000),
            tls_secret("roots", "example-tls"),
            ingressroute(
                "roots",
                "example",
                api::IngressRouteSpec {
                    virtualhost: Some(api::VirtualHost {
                        fqdn: "example.com".to_string(),
                        port: None,
                        tls: Some(api::Tls {
                            secret_name: "example-tls".to_string(),
                            minimum_protocol_version: None,
                        }),
                    }),
                    routes: Vec::new(),
                    tcpproxy: Some(api::TcpProxy {
                        services: vec![api::Service {
                            name: "tcpapp".to_string(),
                            port: 9000,
                            ..Default::default()
                        }],
                    }),
                },
            ),
        ]);
        let svhosts: Vec<_> = dag.secure_virtual_hosts().collect();
        assert_eq!(svhosts.len(), 1);
        let tcp = svhosts[0].tcp_proxy.as_ref().expect("tcpproxy attached");
        assert_eq!(tcp.services[0].cluster_name(), "roots/tcpapp/http");
        assert_eq!(dag.statuses()[0].kind, StatusKind::Valid);
    }

    #[test]
    fn test_ingress_produces_vhost_and_route() {
        let dag = build(vec![
            core_service("default", "kuard", 80),
            KubernetesObject::Ingress(Box::new(ingress(
                "default",
                "kuard",
                "kuard.example.com",
                "kuard",
                80,
            ))),
        ]);
        let vhosts: Vec<_> = dag.virtual_hosts().collect();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(vhosts[0].host, "kuard.example.com");
        assert_eq!(
            vhosts[0].routes["/"].clusters[0].cluster_name(),
            "default/kuard/http"
        );
    }

    #[test]
    fn test_ingress_without_host_binds_wildcard() {
        let mut ing = ingress("default", "kuard", "", "kuard", 80);
        if let Some(rules) = ing.spec.as_mut().and_then(|s| s.rules.as_mut()) {
            rules[0].host = None;
        }
        let dag = build(vec![
            core_service("default", "kuard", 80),
            KubernetesObject::Ingress(Box::new(ing)),
        ]);
        let vhosts: Vec<_> = dag.virtual_hosts().collect();
        assert_eq!(vhosts[0].host, "*");
    }

    #[test]
    fn test_ingress_allow_http_false_suppresses_insecure_routes() {
        let mut ing = ingress("default", "kuard", "kuard.example.com", "kuard", 80);
        ing.metadata.annotations = Some(
            [(
                "kubernetes.io/ingress.allow-http".to_string(),
                "false".to_string(),
            )]
            .into_iter()
            .collect(),
        );
        let dag = build(vec![
            core_service("default", "kuard", 80),
            KubernetesObject::Ingress(Box::new(ing)),
        ]);
        assert_eq!(dag.virtual_hosts().count(), 0);
    }

    #[test]
    fn test_ingress_tls_section_creates_secure_vhost() {
        let mut ing = ingress("default", "kuard", "kuard.example.com", "kuard", 80);
        if let Some(spec) = ing.spec.as_mut() {
            spec.tls = Some(vec![IngressTLS {
                hosts: Some(vec!["kuard.example.com".to_string()]),
                secret_name: Some("kuard-tls".to_string()),
            }]);
        }
        let dag = build(vec![
            core_service("default", "kuard", 80),
            tls_secret("default", "kuard-tls"),
            KubernetesObject::Ingress(Box::new(ing)),
        ]);
        let svhosts: Vec<_> = dag.secure_virtual_hosts().collect();
        assert_eq!(svhosts.len(), 1);
        assert_eq!(svhosts[0].virtual_host.host, "kuard.example.com");
        assert!(svhosts[0].virtual_host.routes.contains_key("/"));
        // the insecure side still serves
        assert_eq!(dag.virtual_hosts().count(), 1);
    }

    #[test]
    fn test_ingress_missing_backend_drops_route_silently() {
        let dag = build(vec![KubernetesObject::Ingress(Box::new(ingress(
            "default",
            "kuard",
            "kuard.example.com",
            "missing",
            80,
        )))]);
        assert_eq!(dag.virtual_hosts().count(), 0);
        assert!(dag.statuses().is_empty());
    }

    #[test]
    fn test_service_annotations_project_onto_cluster() {
        let mut svc = match core_service("default", "kuard", 80) {
            KubernetesObject::Service(s) => *s,
            _ => unreachable!(),
        };
        svc.metadata.annotations = Some(
            [
                ("projectcontour.io/max-connections", "9000"),
                ("projectcontour.io/max-retries", "3"),
                ("projectcontour.io/upstream-protocol.h2", "http"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        let dag = build(vec![
            KubernetesObject::Service(Box::new(svc)),
            ingressroute(
                "default",
                "example",
                root_spec("example.com", vec![service_route("/", "kuard", 80)]),
            ),
        ]);
        let vhosts: Vec<_> = dag.virtual_hosts().collect();
        let cluster = &vhosts[0].routes["/"].clusters[0];
        assert_eq!(cluster.max_connections, 9000);
        assert_eq!(cluster.max_retries, 3);
        assert_eq!(cluster.protocol, crate::dag::UpstreamProtocol::H2);
    }
}
