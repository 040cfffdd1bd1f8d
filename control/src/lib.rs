//! Trellis control plane library
//!
//! Translates observed cluster objects (Ingress, IngressRoute, Service,
//! Secret, Endpoints) into a typed DAG and materializes Envoy configuration
//! resources from it, served to consumers through versioned caches.

pub mod apis;
pub mod config;
pub mod dag;
pub mod error;
pub mod metrics;
pub mod translator;
pub mod xds;

pub use error::Error;
