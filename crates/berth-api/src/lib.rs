//! berth HTTP API
//!
//! Tenants drive the engine through a small JSON API, authenticated with a
//! per-tenant bearer token.
//!
//! # Endpoints
//!
//! - `GET /healthz` - Health check
//! - `GET /api/templates`, `GET /api/templates/{id}` - Service catalog
//! - `GET|POST /api/services`, `DELETE /api/services/{name}`,
//!   `POST /api/services/{name}/exec` - Service lifecycle
//! - `GET /api/dataset-templates[/{id}]`, `GET|POST /api/datasets`,
//!   `DELETE /api/datasets/{name}` - Dataset lifecycle
//! - `PUT /api/credentials` - Replace the ingress password
//! - `POST /api/utils/inject` - Mount the caller's storage into arbitrary YAML

#![deny(missing_docs)]

mod account;
pub mod auth;
pub mod config;
pub mod error;
pub mod resources;
pub mod server;
pub mod templates;

pub use account::{CredentialsRequest, CredentialsResponse};
pub use auth::Authenticator;
pub use config::{ServerConfig, TenantEntry, TlsFiles};
pub use error::{Error, Result};
pub use server::{api_router, serve, AppState};
