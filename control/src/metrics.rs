//! IngressRoute status aggregation and Prometheus export

use std::collections::HashMap;

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::dag::{Status, StatusKind};

/// Aggregation key: a namespace plus, where applicable, the FQDN of the
/// owning virtual host. An empty `vhost` means no vhost dimension applies
/// (orphans, roots rejected before a vhost was established, totals).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Meta {
    pub namespace: String,
    pub vhost: String,
}

impl Meta {
    pub fn namespace(namespace: impl Into<String>) -> Meta {
        Meta {
            namespace: namespace.into(),
            vhost: String::new(),
        }
    }

    pub fn vhost(namespace: impl Into<String>, vhost: impl Into<String>) -> Meta {
        Meta {
            namespace: namespace.into(),
            vhost: vhost.into(),
        }
    }
}

/// Aggregated counts of IngressRoute statuses from one DAG build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngressRouteMetric {
    pub invalid: HashMap<Meta, usize>,
    pub valid: HashMap<Meta, usize>,
    pub orphaned: HashMap<Meta, usize>,
    pub root: HashMap<Meta, usize>,
    pub total: HashMap<Meta, usize>,
}

/// Folds the DAG's per-object statuses into the metric maps. Every status
/// lands in exactly one of valid/invalid/orphaned and always in total;
/// objects carrying a virtualhost block additionally count as roots.
pub fn calculate_ingressroute_metric(statuses: &[Status]) -> IngressRouteMetric {
    let mut metric = IngressRouteMetric::default();
    for status in statuses {
        let namespace = status.meta.namespace.as_str();
        match status.kind {
            StatusKind::Valid => {
                *metric
                    .valid
                    .entry(Meta::vhost(namespace, status.vhost.clone()))
                    .or_default() += 1;
            }
            StatusKind::Invalid => {
                *metric
                    .invalid
                    .entry(Meta::vhost(namespace, status.vhost.clone()))
                    .or_default() += 1;
            }
            StatusKind::Orphaned => {
                *metric.orphaned.entry(Meta::namespace(namespace)).or_default() += 1;
            }
        }
        if status.root {
            *metric.root.entry(Meta::namespace(namespace)).or_default() += 1;
        }
        *metric.total.entry(Meta::namespace(namespace)).or_default() += 1;
    }
    metric
}

/// Prometheus gauges tracking the IngressRoute status partition. The
/// gauges are reset and re-set wholesale on every DAG rebuild.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    ingressroute_total: IntGaugeVec,
    ingressroute_valid: IntGaugeVec,
    ingressroute_invalid: IntGaugeVec,
    ingressroute_orphaned: IntGaugeVec,
    ingressroute_root: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Metrics, prometheus::Error> {
        let registry = Registry::new();
        let ingressroute_total = IntGaugeVec::new(
            Opts::new("trellis_ingressroute_total", "Total number of IngressRoutes"),
            &["namespace"],
        )?;
        let ingressroute_valid = IntGaugeVec::new(
            Opts::new(
                "trellis_ingressroute_valid_total",
                "Number of valid IngressRoutes",
            ),
            &["namespace", "vhost"],
        )?;
        let ingressroute_invalid = IntGaugeVec::new(
            Opts::new(
                "trellis_ingressroute_invalid_total",
                "Number of invalid IngressRoutes",
            ),
            &["namespace", "vhost"],
        )?;
        let ingressroute_orphaned = IntGaugeVec::new(
            Opts::new(
                "trellis_ingressroute_orphaned_total",
                "Number of orphaned IngressRoutes",
            ),
            &["namespace"],
        )?;
        let ingressroute_root = IntGaugeVec::new(
            Opts::new(
                "trellis_ingressroute_root_total",
                "Number of root IngressRoutes",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(ingressroute_total.clone()))?;
        registry.register(Box::new(ingressroute_valid.clone()))?;
        registry.register(Box::new(ingressroute_invalid.clone()))?;
        registry.register(Box::new(ingressroute_orphaned.clone()))?;
        registry.register(Box::new(ingressroute_root.clone()))?;
        Ok(Metrics {
            registry,
            ingressroute_total,
            ingressroute_valid,
            ingressroute_invalid,
            ingressroute_orphaned,
            ingressroute_root,
        })
    }

    /// Replaces the exported gauge values with the supplied aggregation.
    pub fn set_ingressroute_metric(&self, metric: &IngressRouteMetric) {
        self.ingressroute_total.reset();
        self.ingressroute_valid.reset();
        self.ingressroute_invalid.reset();
        self.ingressroute_orphaned.reset();
        self.ingressroute_root.reset();

        for (meta, count) in &metric.total {
            self.ingressroute_total
                .with_label_values(&[meta.namespace.as_str()])
                .set(*count as i64);
        }
        for (meta, count) in &metric.valid {
            self.ingressroute_valid
                .with_label_values(&[meta.namespace.as_str(), meta.vhost.as_str()])
                .set(*count as i64);
        }
        for (meta, count) in &metric.invalid {
            self.ingressroute_invalid
                .with_label_values(&[meta.namespace.as_str(), meta.vhost.as_str()])
                .set(*count as i64);
        }
        for (meta, count) in &metric.orphaned {
            self.ingressroute_orphaned
                .with_label_values(&[meta.namespace.as_str()])
                .set(*count as i64);
        }
        for (meta, count) in &metric.root {
            self.ingressroute_root
                .with_label_values(&[meta.namespace.as_str()])
                .set(*count as i64);
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }
}
