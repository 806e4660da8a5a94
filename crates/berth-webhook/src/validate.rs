//! Validating admission: host-path volumes
//!
//! Tenants may only mount host paths that belong to their own storage
//! domains or to the operator's allow list. `nfs` volumes are always denied.

use std::sync::Arc;

use axum::{extract::State, Json};
use berth_common::Result;
use berth_template::inject::validate_host_paths;
use berth_template::storage::tenant_domains;
use berth_template::StorageDomain;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{debug, error, warn};

use crate::{admitted, WebhookError, WebhookState};

/// Handle validating admission review for objects in tenant namespaces
pub async fn validate_handler(
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

    Json(validate_object(&state, &req).into_review())
}

fn validate_object(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = &request.uid;
    let admitted = match admitted(state, request) {
        Ok(Some(admitted)) => admitted,
        Ok(None) => return AdmissionResponse::from(request),
        Err(e) => {
            error!(uid = %uid, error = %e, "Rejecting malformed admission request");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    let allowed = match allowed_paths(state, admitted.tenant) {
        Ok(allowed) => allowed,
        Err(e) => {
            error!(uid = %uid, tenant = %admitted.tenant, error = %e, "Cannot resolve tenant storage");
            return AdmissionResponse::from(request).deny(WebhookError::from(e).to_string());
        }
    };

    match validate_host_paths(std::slice::from_ref(&admitted.object), &allowed) {
        Ok(()) => {
            debug!(uid = %uid, tenant = %admitted.tenant, "Volumes allowed");
            AdmissionResponse::from(request)
        }
        Err(reason) => {
            warn!(
                uid = %uid,
                tenant = %admitted.tenant,
                name = %request.name,
                reason = %reason,
                "Denying unauthorized volume"
            );
            AdmissionResponse::from(request).deny(reason)
        }
    }
}

/// Host paths of the tenant's storage plus the operator allow list
fn allowed_paths(state: &WebhookState, tenant: &str) -> Result<Vec<String>> {
    let domains = tenant_domains(&state.config.storage, tenant)?;
    Ok(domains
        .iter()
        .filter_map(StorageDomain::host_path)
        .map(str::to_string)
        .chain(state.config.allowed_host_path_dirs.iter().cloned())
        .collect())
}
