//! Per-tenant utilities: credential updates and manifest injection

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use berth_common::yaml::{dump_documents, parse_documents};
use berth_engine::TenantState;
use berth_template::inject::{inject_no_datasets_label, inject_volumes};
use berth_template::storage::tenant_domains;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::resources::body;
use crate::server::AppState;

/// Body of a credentials update
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    /// New htpasswd hash
    pub password_hash: String,
}

/// Provisioning state after a credentials update
#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    /// Tenant provisioning state
    pub state: TenantState,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InjectParams {
    #[serde(default = "mount_datasets")]
    datasets: bool,
}

fn mount_datasets() -> bool {
    true
}

/// `PUT /api/credentials`
pub(crate) async fn update_credentials(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: std::result::Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<CredentialsResponse>> {
    let tenant = state.auth.authenticate(&headers).await?;
    let request = body(request)?;
    if request.password_hash.is_empty() {
        return Err(Error::InvalidBody("passwordHash must not be empty".into()));
    }

    let tenant = tenant.with_password_hash(request.password_hash.clone());
    let tenant_state = state.services.update_credentials(&tenant).await?;
    state
        .auth
        .set_password_hash(&tenant.name, request.password_hash)
        .await;
    info!(tenant = %tenant.name, "Updated credentials");
    Ok(Json(CredentialsResponse {
        state: tenant_state,
    }))
}

/// `POST /api/utils/inject`: decorate arbitrary YAML with the caller's storage
pub(crate) async fn inject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<InjectParams>,
    text: String,
) -> Result<impl IntoResponse> {
    let tenant = state.auth.authenticate(&headers).await?;
    let mut docs = parse_documents(&text).map_err(|e| Error::InvalidBody(e.to_string()))?;

    inject_volumes(
        &mut docs,
        &tenant_domains(&state.config.storage, &tenant.name)?,
        false,
    );
    if !params.datasets {
        inject_no_datasets_label(&mut docs);
    }

    let out = dump_documents(&docs)
        .map_err(|e| berth_common::Error::internal_with_context("inject", e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], out))
}
