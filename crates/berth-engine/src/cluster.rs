//! Cluster access seam
//!
//! The orchestrator and provisioner only talk to the cluster through
//! [`ClusterClient`], which works on untyped JSON documents so that any kind a
//! template emits can be applied. [`KubeClusterClient`] is the kube-rs
//! implementation; every call runs under the configured deadline.

use std::time::Duration;

use async_trait::async_trait;
use berth_common::error::is_status;
use berth_common::kube_utils::{build_api_resource, with_deadline, ManifestRef};
use berth_common::{Error, Result, FIELD_MANAGER};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Operations the engine needs from the cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List objects of a kind, optionally namespaced and label-filtered
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>>;

    /// Fetch one object; `None` if it does not exist
    async fn get(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>>;

    /// Server-side apply a document
    async fn apply(&self, doc: &Value) -> Result<()>;

    /// Create a document; `false` if an object with that name already exists
    async fn create(&self, doc: &Value) -> Result<bool>;

    /// Delete an object; `false` if it was already gone
    async fn delete(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool>;

    /// Run a command in a pod and return its combined output
    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String>;
}

/// kube-rs backed [`ClusterClient`]
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    call_timeout: Duration,
}

impl KubeClusterClient {
    /// Wrap a client; each call is bounded by `call_timeout`
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    fn api_for(&self, doc: &Value) -> Result<(ManifestRef, Api<DynamicObject>)> {
        let target = ManifestRef::from_document(doc)?;
        let namespace = if target.is_cluster_scoped() {
            None
        } else {
            target.namespace.as_deref()
        };
        let api = self.api(&target.api_resource, namespace);
        Ok((target, api))
    }
}

fn to_value(obj: DynamicObject, context: &str) -> Result<Value> {
    serde_json::to_value(obj).map_err(|e| Error::internal_with_context(context, e.to_string()))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let ar = build_api_resource(api_version, kind);
        let api = self.api(&ar, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let context = format!("list {kind}");
        let list = with_deadline(self.call_timeout, &context, api.list(&params)).await?;
        list.items
            .into_iter()
            .map(|obj| to_value(obj, &context))
            .collect()
    }

    async fn get(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        let ar = build_api_resource(api_version, kind);
        let api = self.api(&ar, namespace);
        let context = format!("get {kind}/{name}");
        with_deadline(self.call_timeout, &context, api.get_opt(name))
            .await?
            .map(|obj| to_value(obj, &context))
            .transpose()
    }

    async fn apply(&self, doc: &Value) -> Result<()> {
        let (target, api) = self.api_for(doc)?;
        let context = format!("apply {}/{}", target.api_resource.kind, target.name);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        with_deadline(
            self.call_timeout,
            &context,
            api.patch(&target.name, &params, &Patch::Apply(doc)),
        )
        .await?;
        debug!(kind = %target.api_resource.kind, name = %target.name, "Applied");
        Ok(())
    }

    async fn create(&self, doc: &Value) -> Result<bool> {
        let (target, api) = self.api_for(doc)?;
        let context = format!("create {}/{}", target.api_resource.kind, target.name);
        let obj: DynamicObject = serde_json::from_value(doc.clone())
            .map_err(|e| Error::internal_with_context(&context, e.to_string()))?;
        match tokio::time::timeout(self.call_timeout, api.create(&PostParams::default(), &obj)).await
        {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) if is_status(&e, 409) => Ok(false),
            Ok(Err(e)) => Err(Error::from_kube(context, &e)),
            Err(_) => Err(Error::upstream_timeout(context)),
        }
    }

    async fn delete(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let ar = build_api_resource(api_version, kind);
        let api = self.api(&ar, namespace);
        let context = format!("delete {kind}/{name}");
        match tokio::time::timeout(
            self.call_timeout,
            api.delete(name, &DeleteParams::background()),
        )
        .await
        {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) if is_status(&e, 404) => Ok(false),
            Ok(Err(e)) => Err(Error::from_kube(context, &e)),
            Err(_) => Err(Error::upstream_timeout(context)),
        }
    }

    #[instrument(skip(self, command))]
    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let context = format!("exec {pod}");
        let params = AttachParams::default().stdout(true).stderr(true);

        let run = async {
            let mut process = pods
                .exec(pod, command.to_vec(), &params)
                .await
                .map_err(|e| Error::from_kube(&context, &e))?;

            let mut stdout = String::new();
            let mut stderr = String::new();
            let out = process.stdout();
            let err = process.stderr();
            let read_out = async {
                if let Some(mut reader) = out {
                    reader.read_to_string(&mut stdout).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let read_err = async {
                if let Some(mut reader) = err {
                    reader.read_to_string(&mut stderr).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let (out_result, err_result) = tokio::join!(read_out, read_err);
            out_result
                .and(err_result)
                .map_err(|e| Error::upstream(&context, format!("stream failed: {e}")))?;

            let status = match process.take_status() {
                Some(status) => status.await,
                None => None,
            };
            process
                .join()
                .await
                .map_err(|e| Error::upstream(&context, format!("session failed: {e}")))?;

            if let Some(status) = status {
                if status.status.as_deref() == Some("Failure") {
                    let message = status.message.unwrap_or_else(|| "command failed".to_string());
                    return Err(Error::upstream(&context, message));
                }
            }
            stdout.push_str(&stderr);
            Ok(stdout)
        };

        match tokio::time::timeout(self.call_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::upstream_timeout(context)),
        }
    }
}
