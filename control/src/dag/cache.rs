//! The Kubernetes object cache
//!
//! Holds the last observed revision of every relevant cluster object, keyed
//! by (kind, namespace, name). Writers serialize through one RwLock so a
//! DAG build always observes a consistent snapshot. Clones share the same
//! underlying store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, warn};

use common::IngressRoute;

use crate::dag::annotations::{ingress_class, Annotations};
use crate::dag::Meta;

/// A typed object accepted by [`KubernetesCache::insert`]. Unknown kinds
/// cannot be expressed; the watcher layer constructs this enum.
#[derive(Clone, Debug)]
pub enum KubernetesObject {
    Ingress(Box<Ingress>),
    IngressRoute(Box<IngressRoute>),
    Service(Box<Service>),
    Secret(Box<Secret>),
    Endpoints(Box<Endpoints>),
}

impl KubernetesObject {
    pub fn kind(&self) -> &'static str {
        match self {
            KubernetesObject::Ingress(_) => "Ingress",
            KubernetesObject::IngressRoute(_) => "IngressRoute",
            KubernetesObject::Service(_) => "Service",
            KubernetesObject::Secret(_) => "Secret",
            KubernetesObject::Endpoints(_) => "Endpoints",
        }
    }

    fn object_meta(&self) -> &ObjectMeta {
        match self {
            KubernetesObject::Ingress(o) => &o.metadata,
            KubernetesObject::IngressRoute(o) => &o.metadata,
            KubernetesObject::Service(o) => &o.metadata,
            KubernetesObject::Secret(o) => &o.metadata,
            KubernetesObject::Endpoints(o) => &o.metadata,
        }
    }

    pub fn meta(&self) -> Meta {
        meta_of(self.object_meta())
    }
}

/// Key of the object, defaulting the namespace the way the apiserver does.
pub fn meta_of(meta: &ObjectMeta) -> Meta {
    Meta {
        namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        name: meta.name.clone().unwrap_or_default(),
    }
}

/// One consistent view of every cached object. Only ever handed out behind
/// the cache's read lock.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub ingresses: HashMap<Meta, Ingress>,
    pub ingressroutes: HashMap<Meta, IngressRoute>,
    pub services: HashMap<Meta, Service>,
    pub secrets: HashMap<Meta, Secret>,
    pub endpoints: HashMap<Meta, Endpoints>,
}

/// The shared object cache. Cloning shares the underlying store.
#[derive(Clone, Debug)]
pub struct KubernetesCache {
    inner: Arc<RwLock<Snapshot>>,
    ingress_class: Option<String>,
    root_namespaces: Vec<String>,
}

impl Default for KubernetesCache {
    fn default() -> Self {
        KubernetesCache::new(None, Vec::new())
    }
}

impl KubernetesCache {
    pub fn new(ingress_class: Option<String>, root_namespaces: Vec<String>) -> KubernetesCache {
        KubernetesCache {
            inner: Arc::new(RwLock::new(Snapshot::default())),
            ingress_class,
            root_namespaces,
        }
    }

    /// Namespaces allowed to hold root IngressRoutes. Empty means any.
    pub fn root_namespaces(&self) -> &[String] {
        &self.root_namespaces
    }

    /// Stores the latest revision of the object. Returns whether the cache
    /// contents changed; re-inserting a bit-identical object is a no-op.
    ///
    /// Ingress and IngressRoute objects claiming a foreign ingress class
    /// are not admitted; if a previous revision was admitted it is removed,
    /// so class-annotation edits converge.
    pub fn insert(&self, obj: KubernetesObject) -> bool {
        if matches!(
            &obj,
            KubernetesObject::Ingress(_) | KubernetesObject::IngressRoute(_)
        ) && !self.admitted(obj.object_meta())
        {
            debug!(
                kind = obj.kind(),
                object = %obj.meta(),
                "ignoring object with foreign ingress class"
            );
            return self.remove(&obj);
        }

        let meta = obj.meta();
        let mut inner = safe_write(&self.inner);
        match obj {
            KubernetesObject::Ingress(o) => upsert(&mut inner.ingresses, meta, *o),
            KubernetesObject::IngressRoute(o) => upsert(&mut inner.ingressroutes, meta, *o),
            KubernetesObject::Service(o) => upsert(&mut inner.services, meta, *o),
            KubernetesObject::Secret(o) => upsert(&mut inner.secrets, meta, *o),
            KubernetesObject::Endpoints(o) => upsert(&mut inner.endpoints, meta, *o),
        }
    }

    /// Drops the object. Returns whether anything was removed.
    pub fn remove(&self, obj: &KubernetesObject) -> bool {
        let meta = obj.meta();
        let mut inner = safe_write(&self.inner);
        match obj {
            KubernetesObject::Ingress(_) => inner.ingresses.remove(&meta).is_some(),
            KubernetesObject::IngressRoute(_) => inner.ingressroutes.remove(&meta).is_some(),
            KubernetesObject::Service(_) => inner.services.remove(&meta).is_some(),
            KubernetesObject::Secret(_) => inner.secrets.remove(&meta).is_some(),
            KubernetesObject::Endpoints(_) => inner.endpoints.remove(&meta).is_some(),
        }
    }

    /// Acquires the read lock for the duration of a build.
    pub fn snapshot(&self) -> RwLockReadGuard<'_, Snapshot> {
        safe_read(&self.inner)
    }

    /// Class admission: objects without a class annotation are always
    /// admitted; annotated objects must match the configured class.
    fn admitted(&self, meta: &ObjectMeta) -> bool {
        let empty = Annotations::new();
        let annotations = meta.annotations.as_ref().unwrap_or(&empty);
        match ingress_class(annotations) {
            None => true,
            Some(class) => {
                class
                    == self
                        .ingress_class
                        .as_deref()
                        .unwrap_or(crate::config::DEFAULT_INGRESS_CLASS)
            }
        }
    }
}

fn upsert<T: PartialEq>(map: &mut HashMap<Meta, T>, meta: Meta, value: T) -> bool {
    if map.get(&meta) == Some(&value) {
        return false;
    }
    map.insert(meta, value);
    true
}

/// RwLock read that recovers from poisoning.
pub(crate) fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// RwLock write that recovers from poisoning.
pub(crate) fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::IngressRouteSpec;
    use std::collections::BTreeMap;

    fn service(namespace: &str, name: &str) -> KubernetesObject {
        KubernetesObject::Service(Box::new(Service {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn ingressroute(namespace: &str, name: &str, class: Option<&str>) -> KubernetesObject {
        let mut annotations = BTreeMap::new();
        if let Some(class) = class {
            annotations.insert("kubernetes.io/ingress.class".to_string(), class.to_string());
        }
        let mut ir = IngressRoute::new(name, IngressRouteSpec::default());
        ir.metadata.namespace = Some(namespace.to_string());
        ir.metadata.annotations = Some(annotations);
        KubernetesObject::IngressRoute(Box::new(ir))
    }

    #[test]
    fn test_insert_reports_change() {
        let cache = KubernetesCache::default();
        assert!(cache.insert(service("default", "kuard")));
        // identical object is a no-op
        assert!(!cache.insert(service("default", "kuard")));
        assert_eq!(cache.snapshot().services.len(), 1);
    }

    #[test]
    fn test_insert_is_last_write_wins() {
        let cache = KubernetesCache::default();
        let mut svc = Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("kuard".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cache.insert(KubernetesObject::Service(Box::new(svc.clone()))));
        svc.metadata.labels =
            Some([("app".to_string(), "kuard".to_string())].into_iter().collect());
        assert!(cache.insert(KubernetesObject::Service(Box::new(svc.clone()))));
        let snapshot = cache.snapshot();
        let stored = &snapshot.services[&Meta::new("default", "kuard")];
        assert!(stored.metadata.labels.is_some());
    }

    #[test]
    fn test_remove_reports_presence() {
        let cache = KubernetesCache::default();
        let obj = service("default", "kuard");
        assert!(!cache.remove(&obj));
        cache.insert(obj.clone());
        assert!(cache.remove(&obj));
        assert!(!cache.remove(&obj));
    }

    #[test]
    fn test_unclassed_objects_are_admitted() {
        let cache = KubernetesCache::new(Some("trellis".to_string()), Vec::new());
        assert!(cache.insert(ingressroute("default", "plain", None)));
        assert_eq!(cache.snapshot().ingressroutes.len(), 1);
    }

    #[test]
    fn test_foreign_class_is_rejected() {
        let cache = KubernetesCache::new(Some("trellis".to_string()), Vec::new());
        assert!(!cache.insert(ingressroute("default", "other", Some("nginx"))));
        assert!(cache.snapshot().ingressroutes.is_empty());
    }

    #[test]
    fn test_matching_class_is_admitted() {
        let cache = KubernetesCache::new(Some("trellis".to_string()), Vec::new());
        assert!(cache.insert(ingressroute("default", "mine", Some("trellis"))));
        assert_eq!(cache.snapshot().ingressroutes.len(), 1);
    }

    #[test]
    fn test_class_change_evicts_previous_revision() {
        let cache = KubernetesCache::new(Some("trellis".to_string()), Vec::new());
        assert!(cache.insert(ingressroute("default", "flip", Some("trellis"))));
        // the object moved to another controller's class; admitting it would
        // be wrong, and the old revision must go
        assert!(cache.insert(ingressroute("default", "flip", Some("nginx"))));
        assert!(cache.snapshot().ingressroutes.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let cache = KubernetesCache::default();
        let clone = cache.clone();
        cache.insert(service("default", "kuard"));
        assert_eq!(clone.snapshot().services.len(), 1);
    }
}
