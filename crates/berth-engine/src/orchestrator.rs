//! Resource lifecycle orchestration
//!
//! The orchestrator drives a materialization end to end: template lookup,
//! value validation, singleton enforcement, tenant provisioning, name and
//! prefix reservation, injection, rendering, apply, and the ownership record.
//! Deletion is driven by the ownership record alone.
//!
//! One orchestrator serves one [`ResourceKind`]; services and datasets share
//! the ledger, the tenant namespaces and the reservation scheme.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use berth_common::kube_utils::{kind_priority, ManifestRef};
use berth_common::yaml::{dump_documents, parse_documents};
use berth_common::{EngineConfig, Error, Result, HIDDEN_LABEL, TEMPLATE_LABEL, VALUES_ANNOTATION};
use berth_template::inject::{
    inject_auth, inject_identity, inject_no_auth_label, inject_no_datasets_label, inject_volumes,
    validate_host_paths,
};
use berth_template::model::NAME_VARIABLE;
use berth_template::storage::tenant_domains;
use berth_template::{
    naming, render, CatalogListing, IngressAuth, StorageDomain, Template, TemplateCatalog, Values,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterClient;
use crate::ledger::{OwnershipLedger, OwnershipRecord};
use crate::prefix::{generated_prefix, PrefixAllocator};
use crate::provision::{Provisioner, Tenant, TenantState};
use crate::reservation::Reservations;

/// Attempts at reserving a free name before giving up
const RESERVE_ATTEMPTS: usize = 5;

/// What an orchestrator materializes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Workloads exposed through a Service
    Service,
    /// Datashim datasets
    Dataset,
}

impl ResourceKind {
    /// Kind of the document carrying the identity marker
    pub fn identity_kind(self) -> &'static str {
        match self {
            ResourceKind::Service => "Service",
            ResourceKind::Dataset => "Dataset",
        }
    }

    /// apiVersion of the identity document
    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::Service => "v1",
            ResourceKind::Dataset => "datashim.io/v1alpha1",
        }
    }

    /// Lowercase noun used in errors
    pub fn noun(self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Dataset => "dataset",
        }
    }
}

/// Outcome of a successful create
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Materialized {
    /// Resolved resource name
    pub name: String,
    /// Service or dataset
    pub kind: ResourceKind,
    /// Template it came from
    pub template_id: String,
    /// Where it is served, when it has an ingress prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Applied manifest stream
    pub manifest: String,
}

/// One listed resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    /// Resource name
    pub name: String,
    /// Template recovered from the identity label
    pub template_id: String,
    /// Where it is served, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Values recovered from the identity annotation
    pub values: BTreeMap<String, String>,
    /// Whether the caller owns it and may delete it
    pub deletable: bool,
}

/// Result of running a command in one pod
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecTarget {
    /// Pod name
    pub pod: String,
    /// Combined output, on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure summary, on error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of running a command in a resource's pods
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Per-pod outcomes, ordered by pod name
    pub targets: Vec<ExecTarget>,
    /// Concatenated output of the pods that succeeded
    pub output: String,
}

/// Reservations taken during one create, released if it fails
struct Held {
    name: String,
    prefix: Option<String>,
}

/// Creates, lists, runs commands in and deletes materialized resources
pub struct Orchestrator {
    kind: ResourceKind,
    config: Arc<EngineConfig>,
    catalog: Arc<dyn TemplateCatalog>,
    cluster: Arc<dyn ClusterClient>,
    ledger: Arc<dyn OwnershipLedger>,
    provisioner: Provisioner,
    reservations: Reservations,
}

impl Orchestrator {
    /// Orchestrator for `kind` with a default provisioner
    pub fn new(
        kind: ResourceKind,
        config: Arc<EngineConfig>,
        catalog: Arc<dyn TemplateCatalog>,
        cluster: Arc<dyn ClusterClient>,
        ledger: Arc<dyn OwnershipLedger>,
    ) -> Self {
        let provisioner = Provisioner::new(cluster.clone(), config.clone());
        let reservations = Reservations::new(cluster.clone(), config.system_namespace.clone());
        Self {
            kind,
            config,
            catalog,
            cluster,
            ledger,
            provisioner,
            reservations,
        }
    }

    /// Replace the provisioner
    pub fn with_provisioner(mut self, provisioner: Provisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// What this orchestrator materializes
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The template catalog
    pub async fn templates(&self) -> Result<CatalogListing> {
        self.catalog.list().await
    }

    /// One template
    pub async fn template(&self, id: &str) -> Result<Template> {
        self.catalog.get(id).await
    }

    /// Ensure the tenant's namespace and credentials exist
    pub async fn provision(&self, tenant: &Tenant) -> Result<TenantState> {
        self.provisioner.provision(tenant).await
    }

    /// Replace the tenant's basic-auth credential
    pub async fn update_credentials(&self, tenant: &Tenant) -> Result<TenantState> {
        self.provisioner.update_auth_credential(tenant).await
    }

    /// Materialize `template_id` with caller values
    #[instrument(skip(self, tenant, raw), fields(tenant = %tenant.name, kind = self.kind.noun()))]
    pub async fn create(
        &self,
        tenant: &Tenant,
        template_id: &str,
        raw: &BTreeMap<String, String>,
    ) -> Result<Materialized> {
        let template = self.catalog.get(template_id).await?;
        let values = template.bind(raw)?;
        check_scope(&template)?;
        let ns = self.config.tenant_namespace(&tenant.name);

        if template.flags().singleton {
            let selector = format!("{TEMPLATE_LABEL}={template_id}");
            let existing = self
                .cluster
                .list(
                    self.kind.api_version(),
                    self.kind.identity_kind(),
                    Some(&ns),
                    Some(&selector),
                )
                .await?;
            if !existing.is_empty() {
                return Err(Error::conflict(format!(
                    "template {template_id} allows a single instance and one already exists"
                )));
            }
        }

        // Trial render with the desired name; nothing is written unless it validates.
        let desired = values.get(NAME_VARIABLE).unwrap_or_default().to_string();
        let trial_prefix = match (needs_prefix(&template), self.config.service_url_prefixes.first()) {
            (false, _) => None,
            (true, Some(pooled)) => Some(pooled.clone()),
            (true, None) => Some(generated_prefix(&tenant.name, &desired)?),
        };
        self.build_documents(tenant, &template, &mut values.clone(), &ns, trial_prefix.as_deref())?;

        let state = self.provisioner.provision(tenant).await?;
        debug!(?state, "Tenant provisioned");

        let name = self.reserve_name(&tenant.name, &ns, &desired).await?;
        let mut held = Held {
            name,
            prefix: None,
        };

        match self
            .materialize(tenant, &template, values, &ns, &mut held)
            .await
        {
            Ok(materialized) => Ok(materialized),
            Err(e) => {
                warn!(error = %e, name = %held.name, "Create failed; releasing reservations");
                self.release(&ns, &held.name, held.prefix.as_deref()).await;
                Err(e)
            }
        }
    }

    async fn materialize(
        &self,
        tenant: &Tenant,
        template: &Template,
        mut values: Values,
        ns: &str,
        held: &mut Held,
    ) -> Result<Materialized> {
        let name = held.name.clone();
        values.set(NAME_VARIABLE, name.clone())?;

        let prefix = if needs_prefix(template) {
            let allocator = PrefixAllocator::new(
                self.cluster.as_ref(),
                &self.reservations,
                &self.config.service_url_prefixes,
            );
            let prefix = allocator.allocate(&tenant.name, &name).await?;
            if prefix.reserved {
                held.prefix = Some(prefix.value.clone());
            }
            Some(prefix)
        } else {
            None
        };
        let url_prefix = prefix.as_ref().map(|p| p.value.clone());

        let docs = self.build_documents(tenant, template, &mut values, ns, url_prefix.as_deref())?;

        let manifest = dump_documents(&docs)
            .map_err(|e| Error::internal_with_context("dump_manifest", e.to_string()))?;

        self.apply_all(&docs).await?;

        let record = OwnershipRecord {
            tenant: tenant.name.clone(),
            name: name.clone(),
            kind: self.kind,
            template_id: template.id().to_string(),
            created_at: Utc::now(),
            manifest: manifest.clone(),
            url_prefix: url_prefix.clone(),
            prefix_reserved: held.prefix.is_some(),
        };
        if let Err(e) = self.ledger.put(record).await {
            self.rollback(&docs).await;
            return Err(e);
        }

        let url = url_prefix
            .map(|p| self.config.service_url(&p))
            .transpose()?;
        info!(name = %name, template = %template.id(), url = ?url, "Materialized resource");
        Ok(Materialized {
            name,
            kind: self.kind,
            template_id: template.id().to_string(),
            url,
            manifest,
        })
    }

    /// Resources of this kind in the tenant namespace
    #[instrument(skip(self))]
    pub async fn list(&self, tenant: &str) -> Result<Vec<ResourceSummary>> {
        let ns = self.config.tenant_namespace(tenant);
        let objects = self
            .cluster
            .list(
                self.kind.api_version(),
                self.kind.identity_kind(),
                Some(&ns),
                Some(TEMPLATE_LABEL),
            )
            .await?;
        let owned: BTreeSet<String> = self
            .ledger
            .list_by_tenant(tenant)
            .await?
            .into_iter()
            .filter(|record| record.kind == self.kind)
            .map(|record| record.name)
            .collect();

        let mut summaries: Vec<ResourceSummary> = objects
            .iter()
            .filter(|obj| label(obj, HIDDEN_LABEL).is_none())
            .map(|obj| {
                let values = recorded_values(obj);
                let name = identity_name(obj, &values);
                ResourceSummary {
                    deletable: owned.contains(&name),
                    template_id: label(obj, TEMPLATE_LABEL).unwrap_or_default().to_string(),
                    url: values.get("INGRESS_URL").cloned(),
                    name,
                    values,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Retract a resource the tenant owns
    #[instrument(skip(self))]
    pub async fn delete(&self, tenant: &str, name: &str) -> Result<()> {
        let record = self
            .ledger
            .get(tenant, name)
            .await?
            .filter(|record| record.kind == self.kind)
            .ok_or_else(|| Error::not_found(self.kind.noun(), name))?;

        let mut docs = parse_documents(&record.manifest)
            .map_err(|e| Error::internal_with_context("parse_manifest", e.to_string()))?;
        docs.sort_by_key(|doc| Reverse(kind_priority(doc_kind(doc))));
        for doc in &docs {
            self.delete_document(doc).await?;
        }

        let ns = self.config.tenant_namespace(tenant);
        let prefix = record
            .url_prefix
            .as_deref()
            .filter(|_| record.prefix_reserved);
        self.release(&ns, name, prefix).await;
        self.ledger.delete(tenant, name).await?;
        info!(name = %name, template = %record.template_id, "Deleted resource");
        Ok(())
    }

    /// Run `command` in the first (or every) running pod behind a service
    #[instrument(skip(self, command))]
    pub async fn exec(
        &self,
        tenant: &str,
        name: &str,
        command: &[String],
        all: bool,
    ) -> Result<ExecResult> {
        if self.kind != ResourceKind::Service {
            return Err(Error::bad_request(format!(
                "{}s have no processes to run commands in",
                self.kind.noun()
            )));
        }
        if command.is_empty() {
            return Err(Error::bad_field("command", "command must not be empty"));
        }
        let ns = self.config.tenant_namespace(tenant);

        let services = self
            .cluster
            .list("v1", "Service", Some(&ns), Some(TEMPLATE_LABEL))
            .await?;
        let service = services
            .iter()
            .find(|svc| identity_name(svc, &recorded_values(svc)) == name)
            .ok_or_else(|| Error::not_found("service", name))?;
        let selector = service
            .pointer("/spec/selector")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}={v}")))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .filter(|selector| !selector.is_empty())
            .ok_or_else(|| Error::bad_request(format!("service {name} selects no pods")))?;

        let mut pods: Vec<String> = self
            .cluster
            .list("v1", "Pod", Some(&ns), Some(&selector))
            .await?
            .iter()
            .filter(|pod| pod.pointer("/status/phase").and_then(Value::as_str) == Some("Running"))
            .filter_map(|pod| pod.pointer("/metadata/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        pods.sort();
        if pods.is_empty() {
            return Err(Error::not_found("running pod for service", name));
        }
        if !all {
            pods.truncate(1);
        }

        let mut targets = Vec::with_capacity(pods.len());
        let mut output = String::new();
        for pod in pods {
            match self.cluster.exec(&ns, &pod, command).await {
                Ok(out) => {
                    output.push_str(&out);
                    targets.push(ExecTarget {
                        pod,
                        output: Some(out),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(pod = %pod, error = %e, "Command failed");
                    targets.push(ExecTarget {
                        pod,
                        output: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(ExecResult { targets, output })
    }

    /// Deprovision a tenant and forget everything it owned.
    ///
    /// Returns the number of ownership records removed.
    #[instrument(skip(self))]
    pub async fn remove_tenant(&self, tenant: &str) -> Result<usize> {
        self.provisioner.deprovision(tenant).await?;
        let prefixes = self.reservations.release_tenant_prefixes(tenant).await?;
        let records = self.ledger.delete_tenant(tenant).await?;
        info!(prefixes, records, "Removed tenant");
        Ok(records)
    }

    async fn reserve_name(&self, tenant: &str, ns: &str, desired: &str) -> Result<String> {
        let mut taken: Vec<String> = self
            .cluster
            .list(self.kind.api_version(), self.kind.identity_kind(), Some(ns), None)
            .await?
            .iter()
            .filter_map(|obj| obj.pointer("/metadata/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        taken.extend(
            self.ledger
                .list_by_tenant(tenant)
                .await?
                .into_iter()
                .map(|record| record.name),
        );
        taken.extend(self.reservations.reserved_names(ns).await?);

        for _ in 0..RESERVE_ATTEMPTS {
            let candidate = naming::resolve(desired, &taken);
            if self.reservations.reserve_name(ns, tenant, &candidate).await? {
                return Ok(candidate);
            }
            debug!(candidate = %candidate, "Name reserved concurrently; retrying");
            taken.push(candidate);
        }
        Err(Error::conflict(format!(
            "could not reserve a name based on {desired}"
        )))
    }

    /// Render the template into scoped, validated, apply-ordered documents.
    /// Reads no cluster state.
    fn build_documents(
        &self,
        tenant: &Tenant,
        template: &Template,
        values: &mut Values,
        ns: &str,
        url_prefix: Option<&str>,
    ) -> Result<Vec<Value>> {
        let flags = template.flags();
        let domains = tenant_domains(&self.config.storage, &tenant.name)?;
        self.fill_computed(values, &tenant.name, ns, url_prefix, &domains)?;

        let mut docs = template.documents().to_vec();
        if flags.mount {
            inject_volumes(&mut docs, &domains, false);
        }
        if !inject_identity(&mut docs, self.kind.identity_kind(), template.id(), values)? {
            warn!(
                template = %template.id(),
                "No {} document to mark; the resource will not be listed",
                self.kind.identity_kind()
            );
        }
        if flags.auth {
            inject_auth(
                &mut docs,
                &IngressAuth::from_config(&self.config.auth, &tenant.name),
            );
        } else {
            inject_no_auth_label(&mut docs);
        }
        if !flags.datasets {
            inject_no_datasets_label(&mut docs);
        }

        let rendered = render(&docs, values)?;
        let mut docs = parse_documents(&rendered)
            .map_err(|e| Error::bad_request(format!("rendered manifest is invalid: {e}")))?;
        scope_to_namespace(template.id(), &mut docs, ns)?;
        validate_host_paths(&docs, &self.allowed_host_paths(&domains)).map_err(Error::bad_request)?;
        docs.sort_by_key(|doc| kind_priority(doc_kind(doc)));
        Ok(docs)
    }

    fn fill_computed(
        &self,
        values: &mut Values,
        tenant: &str,
        ns: &str,
        prefix: Option<&str>,
        domains: &[StorageDomain],
    ) -> Result<()> {
        values.insert_computed("NAMESPACE", ns);
        values.insert_computed("USERNAME", tenant);
        if let Some(registry) = &self.config.registry {
            values.insert_computed("REGISTRY", registry.host());
        }
        if let Some(prefix) = prefix {
            values.insert_computed(
                "HOSTNAME",
                format!("{prefix}.{}", self.config.ingress_host()?),
            );
            values.insert_computed("INGRESS_URL", self.config.service_url(prefix)?);
        }
        for domain in domains {
            values.insert_computed(&domain.dir_variable(), &domain.mount_dir);
            values.insert_computed(&domain.volume_variable(), &domain.volume_name);
        }
        Ok(())
    }

    fn allowed_host_paths(&self, domains: &[StorageDomain]) -> Vec<String> {
        domains
            .iter()
            .filter_map(StorageDomain::host_path)
            .map(str::to_string)
            .chain(self.config.allowed_host_path_dirs.iter().cloned())
            .collect()
    }

    async fn apply_all(&self, docs: &[Value]) -> Result<()> {
        for (applied, doc) in docs.iter().enumerate() {
            if let Err(e) = self.cluster.apply(doc).await {
                self.rollback(&docs[..applied]).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best-effort removal of documents applied by a failed create
    async fn rollback(&self, docs: &[Value]) {
        for doc in docs.iter().rev() {
            if let Err(e) = self.delete_document(doc).await {
                warn!(error = %e, "Rollback delete failed");
            }
        }
    }

    async fn delete_document(&self, doc: &Value) -> Result<bool> {
        let target = ManifestRef::from_document(doc)?;
        let namespace = if target.is_cluster_scoped() {
            None
        } else {
            target.namespace.as_deref()
        };
        self.cluster
            .delete(
                &target.api_resource.api_version,
                &target.api_resource.kind,
                namespace,
                &target.name,
            )
            .await
    }

    async fn release(&self, ns: &str, name: &str, prefix: Option<&str>) {
        if let Err(e) = self.reservations.release_name(ns, name).await {
            warn!(name = %name, error = %e, "Failed to release name reservation");
        }
        if let Some(prefix) = prefix {
            if let Err(e) = self.reservations.release_prefix(prefix).await {
                warn!(prefix = %prefix, error = %e, "Failed to release prefix reservation");
            }
        }
    }
}

fn doc_kind(doc: &Value) -> &str {
    doc.get("kind").and_then(Value::as_str).unwrap_or_default()
}

fn label<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.pointer("/metadata/labels")
        .and_then(|labels| labels.get(key))
        .and_then(Value::as_str)
}

/// A template needs a URL prefix when it exposes an ingress or asks for its host
fn needs_prefix(template: &Template) -> bool {
    template
        .documents()
        .iter()
        .any(|doc| doc_kind(doc) == "Ingress")
        || template.data().contains("HOSTNAME")
        || template.data().contains("INGRESS_URL")
}

/// Materializations are confined to the tenant namespace
fn check_scope(template: &Template) -> Result<()> {
    for doc in template.documents() {
        let kind = doc_kind(doc);
        if berth_common::kube_utils::is_cluster_scoped_kind(kind) {
            return Err(Error::invalid_template(
                template.id(),
                format!("cluster-scoped {kind} documents are not allowed"),
            ));
        }
    }
    Ok(())
}

fn scope_to_namespace(template_id: &str, docs: &mut [Value], ns: &str) -> Result<()> {
    for doc in docs.iter_mut() {
        let target = ManifestRef::from_document(doc)?;
        if target.is_cluster_scoped() {
            return Err(Error::invalid_template(
                template_id,
                format!("cluster-scoped {} documents are not allowed", target.api_resource.kind),
            ));
        }
        if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }
    }
    Ok(())
}

/// Values stored in the identity annotation, stringified
fn recorded_values(obj: &Value) -> BTreeMap<String, String> {
    obj.pointer("/metadata/annotations")
        .and_then(|a| a.get(VALUES_ANNOTATION))
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str::<serde_json::Map<String, Value>>(raw).ok())
        .map(|map| {
            map.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn identity_name(obj: &Value, values: &BTreeMap<String, String>) -> String {
    values
        .get(NAME_VARIABLE)
        .map(String::as_str)
        .or_else(|| obj.pointer("/metadata/name").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}
