//! Annotation parsing
//!
//! All object annotations are read through a canonicalizing lookup that
//! tries the `projectcontour.io/` prefix first and falls back to the legacy
//! `contour.heptio.com/` prefix. Malformed numbers parse to 0; malformed
//! durations are treated as unset.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::dag::UpstreamProtocol;

pub const ANNOTATION_PREFIX: &str = "projectcontour.io/";
pub const LEGACY_ANNOTATION_PREFIX: &str = "contour.heptio.com/";

pub type Annotations = BTreeMap<String, String>;

/// Looks up `key` under the current prefix, then under the legacy prefix.
pub fn compat_annotation<'a>(annotations: &'a Annotations, key: &str) -> Option<&'a str> {
    annotations
        .get(&format!("{ANNOTATION_PREFIX}{key}"))
        .or_else(|| annotations.get(&format!("{LEGACY_ANNOTATION_PREFIX}{key}")))
        .map(String::as_str)
}

/// Parses the value as a u32. Absent, malformed or out-of-range values
/// yield zero.
pub fn parse_uint32(value: Option<&str>) -> u32 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Parses the value as a duration, e.g. `90s` or `1m30s`. Absent or
/// malformed values are unset.
pub fn parse_timeout(value: Option<&str>) -> Option<Duration> {
    humantime::parse_duration(value?).ok()
}

/// The ingress class claimed by the object, following the lookup order
/// `projectcontour.io/ingress.class`, `contour.heptio.com/ingress.class`,
/// `kubernetes.io/ingress.class`.
pub fn ingress_class(annotations: &Annotations) -> Option<&str> {
    compat_annotation(annotations, "ingress.class")
        .or_else(|| annotations.get("kubernetes.io/ingress.class").map(String::as_str))
}

/// True unless `kubernetes.io/ingress.allow-http` is set to "false".
pub fn http_allowed(annotations: &Annotations) -> bool {
    annotations.get("kubernetes.io/ingress.allow-http").map(String::as_str) != Some("false")
}

/// True when a force-ssl-redirect annotation is set to "true". Both the
/// contour prefixes and the legacy `ingress.kubernetes.io` key count.
pub fn tls_required(annotations: &Annotations) -> bool {
    compat_annotation(annotations, "force-ssl-redirect") == Some("true")
        || annotations
            .get("ingress.kubernetes.io/force-ssl-redirect")
            .map(String::as_str)
            == Some("true")
}

/// Route prefixes that pass websocket upgrades through, merged across both
/// annotation prefixes.
pub fn websocket_routes(annotations: &Annotations) -> BTreeSet<String> {
    let mut routes = BTreeSet::new();
    for prefix in [ANNOTATION_PREFIX, LEGACY_ANNOTATION_PREFIX] {
        if let Some(value) = annotations.get(&format!("{prefix}websocket-routes")) {
            routes.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
            );
        }
    }
    routes
}

pub fn num_retries(annotations: &Annotations) -> u32 {
    parse_uint32(compat_annotation(annotations, "num-retries"))
}

pub fn per_try_timeout(annotations: &Annotations) -> Option<Duration> {
    parse_timeout(compat_annotation(annotations, "per-try-timeout"))
}

pub fn retry_on(annotations: &Annotations) -> Option<&str> {
    compat_annotation(annotations, "retry-on").filter(|v| !v.is_empty())
}

pub fn response_timeout(annotations: &Annotations) -> Option<Duration> {
    parse_timeout(compat_annotation(annotations, "response-timeout"))
}

pub fn max_connections(annotations: &Annotations) -> u32 {
    parse_uint32(compat_annotation(annotations, "max-connections"))
}

pub fn max_pending_requests(annotations: &Annotations) -> u32 {
    parse_uint32(compat_annotation(annotations, "max-pending-requests"))
}

pub fn max_requests(annotations: &Annotations) -> u32 {
    parse_uint32(compat_annotation(annotations, "max-requests"))
}

pub fn max_retries(annotations: &Annotations) -> u32 {
    parse_uint32(compat_annotation(annotations, "max-retries"))
}

/// Parses the `upstream-protocol.{h2,h2c,tls}` annotations into a map of
/// port (name or number, as written) to protocol.
pub fn parse_upstream_protocols(annotations: &Annotations) -> BTreeMap<String, UpstreamProtocol> {
    let mut up = BTreeMap::new();
    for prefix in [LEGACY_ANNOTATION_PREFIX, ANNOTATION_PREFIX] {
        for protocol in ["h2", "h2c", "tls"] {
            let Some(ports) = annotations.get(&format!("{prefix}upstream-protocol.{protocol}"))
            else {
                continue;
            };
            let Some(proto) = UpstreamProtocol::from_annotation_value(protocol) else {
                continue;
            };
            for port in ports.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                up.insert(port.to_string(), proto);
            }
        }
    }
    up
}
