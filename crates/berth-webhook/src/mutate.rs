//! Mutating admission: storage, dataset volumes and ingress authentication
//!
//! The object is decorated with the same passes materialization uses, then
//! the difference between the submitted and the decorated object is returned
//! as a JSON patch. Pods labeled no-datasets keep only the storage volumes.

use std::sync::Arc;

use axum::{extract::State, Json};
use berth_common::{Result, DATASET_LABEL};
use berth_engine::ClusterClient;
use berth_template::inject::{inject_auth_verbatim, inject_volumes};
use berth_template::storage::{dataset_domains, tenant_domains};
use berth_template::IngressAuth;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::{admitted, Admitted, WebhookError, WebhookState};

/// Handle mutating admission review for objects in tenant namespaces
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate_object(&state, &req).await;
    Json(response.into_review())
}

async fn mutate_object(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.clone();
    let admitted = match admitted(state, request) {
        Ok(Some(admitted)) => admitted,
        Ok(None) => {
            debug!(uid = %uid, "Not a tenant create, allowing unchanged");
            return AdmissionResponse::from(request);
        }
        Err(e) => {
            error!(uid = %uid, error = %e, "Rejecting malformed admission request");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let mutated = match decorate(state, &admitted).await {
        Ok(mutated) => mutated,
        Err(e) => {
            // Undecorated tenant pods are never admitted
            error!(uid = %uid, tenant = %admitted.tenant, error = %e, "Failed to decorate object");
            return AdmissionResponse::from(request).deny(WebhookError::from(e).to_string());
        }
    };

    let patch = json_patch::diff(&admitted.object, &mutated);
    if patch.0.is_empty() {
        return AdmissionResponse::from(request);
    }

    info!(
        uid = %uid,
        tenant = %admitted.tenant,
        name = %request.name,
        patch_ops = patch.0.len(),
        "Patching tenant object"
    );
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Run the storage, dataset and auth passes over a copy of the object
async fn decorate(state: &WebhookState, admitted: &Admitted<'_>) -> Result<Value> {
    let config = &state.config;
    let mut docs = vec![admitted.object.clone()];

    inject_volumes(&mut docs, &tenant_domains(&config.storage, admitted.tenant)?, false);

    let claims = dataset_claims(state.cluster.as_ref(), admitted.namespace).await?;
    inject_volumes(&mut docs, &dataset_domains(&config.storage, &claims), true);

    inject_auth_verbatim(
        &mut docs,
        &IngressAuth::from_config(&config.auth, admitted.tenant),
    );

    Ok(docs.remove(0))
}

/// Names of the dataset claims in a tenant namespace
async fn dataset_claims(
    cluster: &dyn ClusterClient,
    namespace: &str,
) -> Result<Vec<String>> {
    let claims = cluster
        .list(
            "v1",
            "PersistentVolumeClaim",
            Some(namespace),
            Some(DATASET_LABEL),
        )
        .await?;
    let mut names: Vec<String> = claims
        .iter()
        .filter_map(|claim| claim.pointer("/metadata/name").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    names.sort();
    Ok(names)
}
