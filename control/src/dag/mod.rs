//! The DAG intermediate representation
//!
//! One side of the DAG consumes typed Kubernetes objects out of the
//! [`cache::KubernetesCache`]; the other side is walked by the xDS visitors
//! to materialize Listeners, RouteConfigurations, Clusters and
//! ClusterLoadAssignments. A DAG is immutable once built and fully replaced
//! by the next build.

pub mod annotations;
pub mod builder;
pub mod cache;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use common::envoy::{LbPolicy, TlsProtocol};

pub use builder::Builder;
pub use cache::{KubernetesCache, KubernetesObject};

/// Key of a namespaced object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Meta {
    pub namespace: String,
    pub name: String,
}

impl Meta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Meta {
        Meta {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A root vertex of the DAG.
#[derive(Clone, Debug, PartialEq)]
pub enum Vertex {
    VirtualHost(VirtualHost),
    SecureVirtualHost(SecureVirtualHost),
}

impl Vertex {
    pub fn virtual_host(&self) -> &VirtualHost {
        match self {
            Vertex::VirtualHost(vh) => vh,
            Vertex::SecureVirtualHost(svh) => &svh.virtual_host,
        }
    }

    pub fn host(&self) -> &str {
        &self.virtual_host().host
    }

    pub fn port(&self) -> u16 {
        self.virtual_host().port
    }
}

/// An L7 virtual host serving plaintext HTTP.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualHost {
    /// Fully qualified hostname, or `*` for the wildcard host.
    pub host: String,
    pub port: u16,
    /// Routes keyed by match prefix. Adding the same prefix twice keeps the
    /// later route.
    pub routes: BTreeMap<String, Route>,
}

impl VirtualHost {
    pub fn new(host: impl Into<String>, port: u16) -> VirtualHost {
        VirtualHost {
            host: host.into(),
            port,
            routes: BTreeMap::new(),
        }
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.insert(route.prefix.clone(), route);
    }
}

/// A virtual host terminating TLS with a resolved secret.
#[derive(Clone, Debug, PartialEq)]
pub struct SecureVirtualHost {
    pub virtual_host: VirtualHost,
    pub secret: Secret,
    pub min_proto_version: TlsProtocol,
    /// L4 passthrough; when set the host carries no HTTP filter chain.
    pub tcp_proxy: Option<TcpProxy>,
}

/// An HTTP route from a match prefix to a weighted set of upstream services.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Route {
    pub prefix: String,
    pub clusters: Vec<Service>,
    pub websocket: bool,
    pub timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
    pub prefix_rewrite: Option<String>,
    /// Redirect plaintext requests to HTTPS and advertise HSTS on the
    /// secure side.
    pub https_upgrade: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
    pub per_try_timeout: Option<Duration>,
}

/// Supported upstream wire protocols.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpstreamProtocol {
    /// Plaintext HTTP/1.1.
    #[default]
    Plain,
    /// HTTP/2 over TLS.
    H2,
    /// HTTP/2 cleartext.
    H2c,
    /// HTTP/1.1 over TLS.
    Tls,
}

impl UpstreamProtocol {
    pub fn from_annotation_value(value: &str) -> Option<UpstreamProtocol> {
        match value {
            "h2" => Some(UpstreamProtocol::H2),
            "h2c" => Some(UpstreamProtocol::H2c),
            "tls" => Some(UpstreamProtocol::Tls),
            _ => None,
        }
    }
}

/// An upstream service cluster, projected from a Service object and the
/// route (or tcpproxy) entry referencing it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    /// Resolved port number.
    pub port: u16,
    /// Name of the resolved port, when the Service names it.
    pub port_name: String,
    pub weight: u32,
    pub protocol: UpstreamProtocol,
    pub strategy: LbPolicy,
    pub health_check: Option<HealthCheckPolicy>,
    pub max_connections: u32,
    pub max_pending_requests: u32,
    pub max_requests: u32,
    pub max_retries: u32,
}

impl Service {
    /// CDS cluster name: `<namespace>/<service>/<port-name-or-number>`.
    pub fn cluster_name(&self) -> String {
        if self.port_name.is_empty() {
            format!("{}/{}/{}", self.namespace, self.name, self.port)
        } else {
            format!("{}/{}/{}", self.namespace, self.name, self.port_name)
        }
    }

    /// EDS load assignment name: `<namespace>/<service>`.
    pub fn eds_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Active health check settings carried on a service cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthCheckPolicy {
    pub path: String,
    pub host: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

/// L4 passthrough to a weighted set of services.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TcpProxy {
    pub services: Vec<Service>,
}

/// A TLS secret with non-empty certificate and key material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl Secret {
    /// True when both halves of the keypair are present.
    pub fn is_present(&self) -> bool {
        !self.cert.is_empty() && !self.key.is_empty()
    }

    /// Stable fingerprint of the keypair, for change logging.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.cert.hash(&mut hasher);
        self.key.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Validation outcome of one IngressRoute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Valid,
    Invalid,
    Orphaned,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub meta: Meta,
    pub kind: StatusKind,
    pub description: String,
    /// FQDN of the owning virtual host, empty when none applies.
    pub vhost: String,
    /// The object carries a `virtualhost` block.
    pub root: bool,
}

/// The built graph: root virtual host vertices plus the per-IngressRoute
/// validation statuses of the build that produced it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dag {
    roots: Vec<Vertex>,
    statuses: Vec<Status>,
}

impl Dag {
    pub(crate) fn new(roots: Vec<Vertex>, statuses: Vec<Status>) -> Dag {
        Dag { roots, statuses }
    }

    /// Root vertices in (host, port) order.
    pub fn roots(&self) -> &[Vertex] {
        &self.roots
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn virtual_hosts(&self) -> impl Iterator<Item = &VirtualHost> {
        self.roots.iter().filter_map(|v| match v {
            Vertex::VirtualHost(vh) => Some(vh),
            Vertex::SecureVirtualHost(_) => None,
        })
    }

    pub fn secure_virtual_hosts(&self) -> impl Iterator<Item = &SecureVirtualHost> {
        self.roots.iter().filter_map(|v| match v {
            Vertex::SecureVirtualHost(svh) => Some(svh),
            Vertex::VirtualHost(_) => None,
        })
    }
}
