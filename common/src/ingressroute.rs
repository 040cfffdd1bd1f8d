//! The IngressRoute custom resource (`contour.heptio.com/v1beta1`)
//!
//! An IngressRoute describes an HTTP virtual host whose routes either name
//! backend services directly or delegate a path prefix to another
//! IngressRoute. Delegation chains start at a root IngressRoute (one with a
//! `virtualhost` block) and must form a DAG; the control plane validates
//! every document it observes and reports a status per object.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of the IngressRoute custom resource.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "contour.heptio.com",
    version = "v1beta1",
    kind = "IngressRoute",
    plural = "ingressroutes",
    shortname = "ir",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"FQDN","type":"string","jsonPath":".spec.virtualhost.fqdn"}"#,
    printcolumn = r#"{"name":"TLS Secret","type":"string","jsonPath":".spec.virtualhost.tls.secretName"}"#
)]
pub struct IngressRouteSpec {
    /// Virtual host this document is the root of. Only root IngressRoutes
    /// carry a virtualhost block; delegated documents leave it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,

    /// The routes of the virtual host, or the routes offered for delegation.
    #[serde(default)]
    pub routes: Vec<Route>,

    /// L4 passthrough to a set of services. Requires `virtualhost.tls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcpproxy: Option<TcpProxy>,
}

/// The FQDN (and optional TLS configuration) a root IngressRoute claims.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VirtualHost {
    /// Fully qualified domain name of the virtual host, e.g. `www.example.com`.
    #[serde(default)]
    pub fqdn: String,

    /// Port the secure virtual host binds. Defaults to 443; any other value
    /// produces a dedicated TCP listener for this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// TLS termination settings. Presence of this block makes the virtual
    /// host secure, provided the named secret resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

/// TLS settings of a secure virtual host.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    /// Name of a `kubernetes.io/tls` secret in the IngressRoute's namespace.
    pub secret_name: String,

    /// Minimum TLS protocol version: "1.2" or "1.3"; anything else means 1.1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_protocol_version: Option<String>,
}

/// A single route entry. `services` and `delegate` are mutually exclusive;
/// a route carrying both, or neither, is invalid.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Path prefix this route matches. A delegated route's match must begin
    /// with the prefix of the route that delegated to it.
    #[serde(rename = "match")]
    pub match_: String,

    /// Backend services receiving traffic for this route.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    /// Hand resolution of this prefix over to another IngressRoute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Delegate>,

    /// Pass websocket upgrade requests through to the backend.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_websockets: bool,

    /// Rewrite the matched prefix before forwarding upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,

    /// Response timeout policy for this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_policy: Option<TimeoutPolicy>,

    /// Retry policy for this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

/// A weighted backend service reference.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Name of a Service in the IngressRoute's namespace.
    pub name: String,

    /// Service port. Must be within 1-65535.
    pub port: i32,

    /// Relative weight of this service within the route. Must not be
    /// negative; when every weight is zero, traffic is split evenly.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub weight: i32,

    /// Load balancing strategy: `WeightedLeastRequest`, `Random`,
    /// `RingHash` or `Maglev`. Unset or unrecognized means round robin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Active health check performed against this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Target of a delegation edge.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Delegate {
    /// Name of the IngressRoute to continue resolution at.
    pub name: String,

    /// Namespace of the target. Defaults to the delegating document's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Response timeout policy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TimeoutPolicy {
    /// Timeout for receiving a response from the backend, e.g. `30s`.
    /// Malformed values leave the timeout unset.
    #[serde(default)]
    pub request: String,
}

/// Retry policy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Number of retry attempts.
    #[serde(default, rename = "count")]
    pub num_retries: u32,

    /// Per-retry timeout, e.g. `150ms`. Malformed values leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
}

/// Per-service active health check settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// HTTP path probed on the backend.
    pub path: String,

    /// Host header used for the probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy_threshold_count: Option<u32>,
}

/// L4 passthrough block.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TcpProxy {
    /// Backend services receiving the raw TCP stream.
    #[serde(default)]
    pub services: Vec<Service>,
}
