use std::sync::Arc;

use anyhow::Result;
use kube::Client;
use tokio::signal;
use tracing::{error, info};

use common::envoy::bootstrap::{bootstrap, BootstrapConfig};
use control::apis;
use control::config::ControllerConfig;
use control::translator::Translator;

/// Trellis control plane.
///
/// Watches Ingress, IngressRoute, Service, Secret and Endpoints objects,
/// translates them into Envoy configuration and serves the result through
/// the xDS resource caches. With TRELLIS_BOOTSTRAP_PATH set, writes the
/// Envoy bootstrap document instead and exits.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    if let Ok(path) = std::env::var("TRELLIS_BOOTSTRAP_PATH") {
        return write_bootstrap(&path);
    }

    let config = ControllerConfig::from_env()?;
    let translator = Arc::new(Translator::new(&config)?);

    let client = Client::try_default().await?;
    info!(
        ingress_class = config.ingress_class.as_deref().unwrap_or("<unclassed>"),
        root_namespaces = ?config.root_namespaces,
        "starting trellis control plane"
    );

    let watchers = vec![
        tokio::spawn(apis::watch_ingresses(client.clone(), translator.clone())),
        tokio::spawn(apis::watch_ingressroutes(client.clone(), translator.clone())),
        tokio::spawn(apis::watch_services(client.clone(), translator.clone())),
        tokio::spawn(apis::watch_secrets(client.clone(), translator.clone())),
        tokio::spawn(apis::watch_endpoints(client, translator.clone())),
    ];

    tokio::select! {
        results = futures::future::join_all(watchers) => {
            for result in results {
                if let Ok(Err(e)) = result {
                    error!(error = %e, "watcher exited");
                }
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    translator.shutdown();
    Ok(())
}

fn write_bootstrap(path: &str) -> Result<()> {
    let mut config = BootstrapConfig::default();
    if let Ok(address) = std::env::var("TRELLIS_XDS_ADDRESS") {
        config.xds_address = address;
    }
    if let Ok(port) = std::env::var("TRELLIS_XDS_PORT") {
        config.xds_port = port.parse()?;
    }
    if let Ok(enabled) = std::env::var("TRELLIS_STATSD_ENABLED") {
        config.statsd_enabled = enabled.parse()?;
    }

    let doc = bootstrap(&config);
    std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    info!(path = %path, "wrote bootstrap configuration");
    Ok(())
}
