//! Resource endpoints
//!
//! Services and datasets expose the same four operations, each backed by its
//! own orchestrator:
//!
//! - `GET    {base}` - list the caller's resources
//! - `POST   {base}` - materialize a template (`{template, values}`)
//! - `DELETE {base}/{name}` - retract an owned resource
//! - `POST   {base}/{name}/exec` - run a command (`{command, all}`)

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use berth_engine::{ExecResult, Materialized, Orchestrator, ResourceSummary};
use serde::Deserialize;
use tracing::info;

use crate::auth::Authenticator;
use crate::error::{Error, Result};

/// State shared by the endpoints of one resource kind
#[derive(Clone)]
pub struct ResourceState {
    /// Orchestrator for this kind
    pub orchestrator: Arc<Orchestrator>,
    /// Tenant authentication
    pub auth: Arc<Authenticator>,
}

/// Body of a create call
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// Template identifier
    pub template: String,
    /// Variable values by name
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Body of an exec call
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    /// Command and arguments
    pub command: Vec<String>,
    /// Run in every pod instead of the first
    #[serde(default)]
    pub all: bool,
}

/// Routes for one resource kind under `base`
pub fn resource_router(base: &str, state: ResourceState) -> Router {
    Router::new()
        .route(base, get(list_resources).post(create_resource))
        .route(&format!("{base}/{{name}}"), delete(delete_resource))
        .route(&format!("{base}/{{name}}/exec"), post(exec_resource))
        .with_state(state)
}

/// Unwrap a JSON body, reporting rejections in the API error shape
pub(crate) fn body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|e| Error::InvalidBody(e.body_text()))
}

async fn list_resources(
    State(state): State<ResourceState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ResourceSummary>>> {
    let tenant = state.auth.authenticate(&headers).await?;
    Ok(Json(state.orchestrator.list(&tenant.name).await?))
}

async fn create_resource(
    State(state): State<ResourceState>,
    headers: HeaderMap,
    request: std::result::Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Materialized>)> {
    let tenant = state.auth.authenticate(&headers).await?;
    let request = body(request)?;
    let created = state
        .orchestrator
        .create(&tenant, &request.template, &request.values)
        .await?;
    info!(
        tenant = %tenant.name,
        name = %created.name,
        template = %created.template_id,
        "Created {}",
        created.kind.noun()
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_resource(
    State(state): State<ResourceState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    let tenant = state.auth.authenticate(&headers).await?;
    state.orchestrator.delete(&tenant.name, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn exec_resource(
    State(state): State<ResourceState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    request: std::result::Result<Json<ExecRequest>, JsonRejection>,
) -> Result<Json<ExecResult>> {
    let tenant = state.auth.authenticate(&headers).await?;
    let request = body(request)?;
    let result = state
        .orchestrator
        .exec(&tenant.name, &name, &request.command, request.all)
        .await?;
    Ok(Json(result))
}
