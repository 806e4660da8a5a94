//! Atomic reservation of names and URL prefixes
//!
//! A reservation is a placeholder ConfigMap whose name encodes the reserved
//! value. Creating it is the atomic step: a create that finds the object
//! already present means someone else holds the value. Name reservations
//! live in the tenant namespace and disappear with it; prefix reservations
//! are cluster-wide and live in the system namespace.

use std::sync::Arc;

use berth_common::{Result, RESERVATION_LABEL, TENANT_LABEL};
use serde_json::{json, Value};
use tracing::debug;

use crate::cluster::ClusterClient;

const NAME_KIND: &str = "name";
const PREFIX_KIND: &str = "prefix";

/// Reserves names within tenant namespaces and URL prefixes cluster-wide
#[derive(Clone)]
pub struct Reservations {
    cluster: Arc<dyn ClusterClient>,
    system_namespace: String,
}

impl Reservations {
    /// Prefix reservations are kept in `system_namespace`
    pub fn new(cluster: Arc<dyn ClusterClient>, system_namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            system_namespace: system_namespace.into(),
        }
    }

    /// Reserve `name` in `namespace`; `false` if it is already held
    pub async fn reserve_name(&self, namespace: &str, tenant: &str, name: &str) -> Result<bool> {
        self.reserve(NAME_KIND, namespace, tenant, name).await
    }

    /// Release a name reservation; releasing twice is harmless
    pub async fn release_name(&self, namespace: &str, name: &str) -> Result<()> {
        self.release(NAME_KIND, namespace, name).await
    }

    /// Names currently reserved in `namespace`
    pub async fn reserved_names(&self, namespace: &str) -> Result<Vec<String>> {
        self.reserved(NAME_KIND, namespace, None).await
    }

    /// Reserve a URL prefix for `tenant`; `false` if it is already held
    pub async fn reserve_prefix(&self, tenant: &str, prefix: &str) -> Result<bool> {
        self.reserve(PREFIX_KIND, &self.system_namespace, tenant, prefix)
            .await
    }

    /// Release a URL prefix reservation
    pub async fn release_prefix(&self, prefix: &str) -> Result<()> {
        self.release(PREFIX_KIND, &self.system_namespace, prefix)
            .await
    }

    /// Prefixes currently reserved by anyone
    pub async fn reserved_prefixes(&self) -> Result<Vec<String>> {
        self.reserved(PREFIX_KIND, &self.system_namespace, None).await
    }

    /// Release every prefix a tenant holds; returns how many were released
    pub async fn release_tenant_prefixes(&self, tenant: &str) -> Result<usize> {
        let prefixes = self
            .reserved(PREFIX_KIND, &self.system_namespace, Some(tenant))
            .await?;
        for prefix in &prefixes {
            self.release_prefix(prefix).await?;
        }
        Ok(prefixes.len())
    }

    async fn reserve(&self, kind: &str, namespace: &str, tenant: &str, value: &str) -> Result<bool> {
        let placeholder = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": object_name(kind, value),
                "namespace": namespace,
                "labels": {RESERVATION_LABEL: kind, TENANT_LABEL: tenant}
            },
            "data": {"value": value}
        });
        let created = self.cluster.create(&placeholder).await?;
        debug!(kind, namespace, value, created, "Reservation attempt");
        Ok(created)
    }

    async fn release(&self, kind: &str, namespace: &str, value: &str) -> Result<()> {
        self.cluster
            .delete("v1", "ConfigMap", Some(namespace), &object_name(kind, value))
            .await?;
        Ok(())
    }

    async fn reserved(&self, kind: &str, namespace: &str, tenant: Option<&str>) -> Result<Vec<String>> {
        let mut selector = format!("{RESERVATION_LABEL}={kind}");
        if let Some(tenant) = tenant {
            selector.push_str(&format!(",{TENANT_LABEL}={tenant}"));
        }
        let objects = self
            .cluster
            .list("v1", "ConfigMap", Some(namespace), Some(&selector))
            .await?;
        Ok(objects
            .iter()
            .filter_map(|obj| obj.pointer("/data/value").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

fn object_name(kind: &str, value: &str) -> String {
    format!("berth-{kind}-{value}")
}
