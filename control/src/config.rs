//! Configuration for the trellis controller
//!
//! Covers object admission (ingress class, root namespaces) and the shape
//! of the emitted Envoy listeners.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::Error;

/// Ingress class assumed when the deployment does not configure one.
pub const DEFAULT_INGRESS_CLASS: &str = "trellis";

/// Controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// IngressClass to admit. `None` admits any unclassed object.
    pub ingress_class: Option<String>,

    /// Namespaces allowed to hold root IngressRoutes. Empty means any.
    #[serde(default)]
    pub root_namespaces: Vec<String>,

    /// Shape of the emitted listeners.
    #[serde(default)]
    pub listener: ListenerConfig,
}

/// Parameters of the emitted `ingress_http` / `ingress_https` listeners.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// HTTP (non TLS) listener address. Defaults to 0.0.0.0.
    #[serde(default)]
    pub http_address: String,

    /// HTTP (non TLS) listener port. Defaults to 8080.
    #[serde(default)]
    pub http_port: u32,

    /// HTTP access log path. Defaults to /dev/stdout.
    #[serde(default)]
    pub http_access_log: String,

    /// HTTPS (TLS) listener address. Defaults to 0.0.0.0.
    #[serde(default)]
    pub https_address: String,

    /// HTTPS (TLS) listener port. Defaults to 8443.
    #[serde(default)]
    pub https_port: u32,

    /// HTTPS access log path. Defaults to /dev/stdout.
    #[serde(default)]
    pub https_access_log: String,

    /// Expect a PROXY protocol V1 header on new connections.
    #[serde(default)]
    pub use_proxy_proto: bool,
}

impl ListenerConfig {
    pub fn http_address(&self) -> &str {
        or_default(&self.http_address, "0.0.0.0")
    }

    pub fn http_port(&self) -> u32 {
        or_default_port(self.http_port, 8080)
    }

    pub fn http_access_log(&self) -> &str {
        or_default(&self.http_access_log, "/dev/stdout")
    }

    pub fn https_address(&self) -> &str {
        or_default(&self.https_address, "0.0.0.0")
    }

    pub fn https_port(&self) -> u32 {
        or_default_port(self.https_port, 8443)
    }

    pub fn https_access_log(&self) -> &str {
        or_default(&self.https_access_log, "/dev/stdout")
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn or_default_port(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ingress_class: None,
            root_namespaces: Vec::new(),
            listener: ListenerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(val) = env::var("TRELLIS_INGRESS_CLASS") {
            config.ingress_class = Some(val);
        }

        if let Ok(val) = env::var("TRELLIS_ROOT_NAMESPACES") {
            config.root_namespaces = val
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(val) = env::var("TRELLIS_HTTP_ADDRESS") {
            config.listener.http_address = val;
        }
        if let Ok(val) = env::var("TRELLIS_HTTP_PORT") {
            config.listener.http_port = val
                .parse()
                .map_err(|_| Error::Config(format!("invalid TRELLIS_HTTP_PORT: {val}")))?;
        }
        if let Ok(val) = env::var("TRELLIS_HTTPS_ADDRESS") {
            config.listener.https_address = val;
        }
        if let Ok(val) = env::var("TRELLIS_HTTPS_PORT") {
            config.listener.https_port = val
                .parse()
                .map_err(|_| Error::Config(format!("invalid TRELLIS_HTTPS_PORT: {val}")))?;
        }
        if let Ok(val) = env::var("TRELLIS_USE_PROXY_PROTO") {
            config.listener.use_proxy_proto = val
                .parse()
                .map_err(|_| Error::Config(format!("invalid TRELLIS_USE_PROXY_PROTO: {val}")))?;
        }

        Ok(config)
    }
}
