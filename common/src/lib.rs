//! Trellis shared types
//!
//! Wire-facing types shared between the control plane and its consumers:
//! the `IngressRoute` CRD (`contour.heptio.com/v1beta1`) and the typed
//! Envoy resource shapes the translation core emits over xDS.

pub mod envoy;
pub mod ingressroute;

pub use ingressroute::{
    Delegate, HealthCheck, IngressRoute, IngressRouteSpec, RetryPolicy, Route, Service, TcpProxy,
    TimeoutPolicy, Tls, VirtualHost,
};
