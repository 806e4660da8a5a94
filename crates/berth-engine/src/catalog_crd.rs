//! Catalog backed by `ServiceTemplate` custom resources
//!
//! Operators publish templates as `ServiceTemplate` objects in the system
//! namespace. The object name is the template identifier. Disabled entries
//! are invisible; malformed ones are listed as skipped.

use std::sync::Arc;

use async_trait::async_trait;
use berth_common::config::FlagDefaults;
use berth_common::crd::ServiceTemplate;
use berth_common::{Error, Result};
use berth_template::{CatalogListing, Template, TemplateCatalog};
use kube::Resource;
use serde_json::Value;

use crate::cluster::ClusterClient;

/// Templates stored in the cluster
pub struct ClusterCatalog {
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
    defaults: FlagDefaults,
}

impl ClusterCatalog {
    /// Read `ServiceTemplate` objects from `namespace`
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        defaults: FlagDefaults,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            defaults,
        }
    }

    fn parse(&self, id: &str, object: Value) -> Option<Result<Template>> {
        let entry: ServiceTemplate = match serde_json::from_value(object) {
            Ok(entry) => entry,
            Err(e) => return Some(Err(Error::invalid_template(id, e.to_string()))),
        };
        if entry.spec.disabled {
            return None;
        }
        Some(Template::parse(id, &entry.spec.data, self.defaults))
    }
}

fn api_version() -> String {
    ServiceTemplate::api_version(&()).to_string()
}

fn kind() -> String {
    ServiceTemplate::kind(&()).to_string()
}

#[async_trait]
impl TemplateCatalog for ClusterCatalog {
    async fn list(&self) -> Result<CatalogListing> {
        let objects = self
            .cluster
            .list(&api_version(), &kind(), Some(&self.namespace), None)
            .await?;
        let mut listing = CatalogListing::default();
        for object in objects {
            let id = object
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(parsed) = self.parse(&id, object) {
                listing.push(&id, parsed);
            }
        }
        listing.sort();
        Ok(listing)
    }

    async fn get(&self, id: &str) -> Result<Template> {
        let object = self
            .cluster
            .get(&api_version(), &kind(), Some(&self.namespace), id)
            .await?
            .ok_or_else(|| Error::not_found("template", id))?;
        self.parse(id, object)
            .unwrap_or_else(|| Err(Error::not_found("template", id)))
    }
}
