//! Common types for berth: errors, configuration, CRDs and Kubernetes utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use config::EngineConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Identity and marker conventions
// =============================================================================
// These keys are the interop contract between materialization, listing and the
// admission webhook. Renaming any of them orphans live resources.

/// Label on the exposed Service naming the template it was materialized from
pub const TEMPLATE_LABEL: &str = "berth.dev/template";

/// Annotation on the exposed Service holding the JSON-serialized values
pub const VALUES_ANNOTATION: &str = "berth.dev/values";

/// Label hiding a Service from identity marking and listings
pub const HIDDEN_LABEL: &str = "berth.dev/hidden";

/// Label on pod-bearing metadata excluding it from dataset volume injection
pub const NO_DATASETS_LABEL: &str = "berth.dev/no-datasets";

/// Label on an Ingress that opts out of authentication injection
pub const NO_AUTH_LABEL: &str = "berth.dev/no-auth";

/// Label on tenant namespaces naming the owning tenant
pub const TENANT_LABEL: &str = "berth.dev/tenant";

/// Label on PersistentVolumeClaims that back a tenant dataset
pub const DATASET_LABEL: &str = "berth.dev/dataset";

/// Label on reservation ConfigMaps (names and URL prefixes)
pub const RESERVATION_LABEL: &str = "berth.dev/reservation";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "berth";

/// Name of the basic-auth credential Secret in every tenant namespace
pub const AUTH_SECRET_NAME: &str = "berth-auth";

/// Name of the registry pull Secret in every tenant namespace
pub const REGISTRY_SECRET_NAME: &str = "berth-registry";
