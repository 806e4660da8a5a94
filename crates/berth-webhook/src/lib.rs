//! Admission webhook for berth tenant namespaces
//!
//! Objects created directly by tenants bypass the materialization pipeline,
//! so the cluster calls back here on every CREATE in a tenant namespace:
//! - `POST /mutate` mounts the tenant's storage and dataset volumes and adds
//!   ingress authentication
//! - `POST /validate` rejects host-path volumes outside the tenant's storage
//!
//! Requests for namespaces that do not belong to a tenant, and operations
//! other than CREATE, are allowed unchanged.

#![deny(missing_docs)]

mod error;
mod mutate;
mod validate;

use std::sync::Arc;

use axum::{routing::post, Router};
use berth_common::EngineConfig;
use berth_engine::ClusterClient;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use serde_json::Value;

pub use error::WebhookError;
pub use mutate::mutate_handler;
pub use validate::validate_handler;

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Cluster access, for dataset claims
    pub cluster: Arc<dyn ClusterClient>,
    /// Engine configuration (namespace prefix, storage, auth)
    pub config: Arc<EngineConfig>,
}

impl WebhookState {
    /// Create webhook state
    pub fn new(cluster: Arc<dyn ClusterClient>, config: Arc<EngineConfig>) -> Self {
        Self { cluster, config }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/validate", post(validate_handler))
        .with_state(state)
}

/// A CREATE in a tenant namespace
struct Admitted<'a> {
    tenant: &'a str,
    namespace: &'a str,
    object: Value,
}

/// Pick out the requests the webhook acts on; `Ok(None)` means allow unchanged
fn admitted<'a>(
    state: &WebhookState,
    request: &'a AdmissionRequest<DynamicObject>,
) -> Result<Option<Admitted<'a>>, WebhookError> {
    if !matches!(request.operation, Operation::Create) {
        return Ok(None);
    }
    let Some(namespace) = request.namespace.as_deref() else {
        return Ok(None);
    };
    let Some(tenant) = state.config.tenant_for_namespace(namespace) else {
        return Ok(None);
    };
    let Some(object) = &request.object else {
        return Err(WebhookError::InvalidReview(
            "CREATE request carries no object".to_string(),
        ));
    };

    let mut object = serde_json::to_value(object)?;
    if let Some(fields) = object.as_object_mut() {
        fields
            .entry("kind")
            .or_insert_with(|| Value::String(request.kind.kind.clone()));
    }
    Ok(Some(Admitted {
        tenant,
        namespace,
        object,
    }))
}
