//! Kubernetes watch wiring
//!
//! One watcher task per kind, each translating watch events into object
//! cache inserts/removes on the shared [`Translator`]. The kube watcher
//! re-lists internally after transient failures; errors here are logged
//! and the stream continues.

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use common::IngressRoute;

use crate::dag::KubernetesObject;
use crate::error::Error;
use crate::translator::Translator;

pub async fn watch_ingresses(client: Client, translator: Arc<Translator>) -> Result<(), Error> {
    watch_objects(Api::<Ingress>::all(client), translator, "Ingress", |o| {
        KubernetesObject::Ingress(Box::new(o))
    })
    .await
}

pub async fn watch_ingressroutes(client: Client, translator: Arc<Translator>) -> Result<(), Error> {
    watch_objects(
        Api::<IngressRoute>::all(client),
        translator,
        "IngressRoute",
        |o| KubernetesObject::IngressRoute(Box::new(o)),
    )
    .await
}

pub async fn watch_services(client: Client, translator: Arc<Translator>) -> Result<(), Error> {
    watch_objects(Api::<Service>::all(client), translator, "Service", |o| {
        KubernetesObject::Service(Box::new(o))
    })
    .await
}

pub async fn watch_secrets(client: Client, translator: Arc<Translator>) -> Result<(), Error> {
    watch_objects(Api::<Secret>::all(client), translator, "Secret", |o| {
        KubernetesObject::Secret(Box::new(o))
    })
    .await
}

pub async fn watch_endpoints(client: Client, translator: Arc<Translator>) -> Result<(), Error> {
    watch_objects(Api::<Endpoints>::all(client), translator, "Endpoints", |o| {
        KubernetesObject::Endpoints(Box::new(o))
    })
    .await
}

async fn watch_objects<K>(
    api: Api<K>,
    translator: Arc<Translator>,
    kind: &'static str,
    wrap: fn(K) -> KubernetesObject,
) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let stream = watcher(api, WatcherConfig::default());
    futures::pin_mut!(stream);

    info!(kind, "starting watcher");

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                translator.on_insert(wrap(obj));
            }
            Ok(watcher::Event::Delete(obj)) => {
                translator.on_remove(&wrap(obj));
            }
            Ok(watcher::Event::Init) => {
                debug!(kind, "watcher initialized");
            }
            Ok(watcher::Event::InitDone) => {
                info!(kind, "initial sync complete");
                // publish the synced state even when nothing changed
                translator.rebuild();
            }
            Err(e) => {
                warn!(kind, error = %e, "watcher error");
            }
        }
    }

    Ok(())
}
