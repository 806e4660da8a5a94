//! Catalog endpoints

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use berth_template::{SkippedTemplate, TemplateSummary};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resources::ResourceState;

/// Catalog listing as returned to clients
#[derive(Debug, Serialize)]
pub struct TemplateList {
    /// Usable templates
    pub templates: Vec<TemplateSummary>,
    /// Entries that failed to load
    pub skipped: Vec<SkippedTemplate>,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    data: bool,
}

/// Catalog routes under `base`
pub fn catalog_router(base: &str, state: ResourceState) -> Router {
    Router::new()
        .route(base, get(list_templates))
        .route(&format!("{base}/{{id}}"), get(get_template))
        .with_state(state)
}

async fn list_templates(
    State(state): State<ResourceState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<TemplateList>> {
    state.auth.authenticate(&headers).await?;
    let listing = state.orchestrator.templates().await?;
    Ok(Json(TemplateList {
        templates: listing
            .templates
            .iter()
            .map(|t| t.format(params.data))
            .collect(),
        skipped: listing.skipped,
    }))
}

async fn get_template(
    State(state): State<ResourceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TemplateSummary>> {
    state.auth.authenticate(&headers).await?;
    let template = state.orchestrator.template(&id).await?;
    Ok(Json(template.format(true)))
}
