//! berth server
//!
//! Hosts the tenant API and the admission webhook over one shared engine.

pub mod app;

pub use app::{build, service_catalog, serve_webhook, App};
