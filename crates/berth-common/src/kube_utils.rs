//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction with bounded timeouts, `ApiResource` building for
//! manifests whose kind is only known at runtime, and a deadline wrapper that
//! turns slow cluster calls into retryable upstream errors.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;

use crate::Error;

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Run a cluster call under a deadline.
///
/// Elapsed deadlines become `UpstreamUnavailable { timed_out: true }`; kube
/// errors are summarized through [`Error::from_kube`].
pub async fn with_deadline<T, Fut>(deadline: Duration, context: &str, call: Fut) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::from_kube(context, &e)),
        Err(_) => Err(Error::upstream_timeout(context)),
    }
}

/// Identity of a manifest document: what it is, where it lives, what it is called
#[derive(Clone, Debug)]
pub struct ManifestRef {
    /// API resource definition derived from apiVersion/kind
    pub api_resource: ApiResource,
    /// metadata.name
    pub name: String,
    /// metadata.namespace, if set in the document
    pub namespace: Option<String>,
}

impl ManifestRef {
    /// Extract the identity of a manifest document
    pub fn from_document(doc: &Value) -> Result<Self, Error> {
        let api_version = doc
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_request("manifest missing apiVersion"))?;
        let kind = doc
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_request("manifest missing kind"))?;
        let name = doc
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_request(format!("{kind} manifest missing metadata.name")))?;
        let namespace = doc
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            api_resource: build_api_resource(api_version, kind),
            name: name.to_string(),
            namespace,
        })
    }

    /// Whether this kind lives outside namespaces
    pub fn is_cluster_scoped(&self) -> bool {
        is_cluster_scoped_kind(&self.api_resource.kind)
    }
}

/// Kinds that manifests may carry which are not namespaced
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "PersistentVolume"
            | "StorageClass"
            | "CustomResourceDefinition"
            | "MutatingWebhookConfiguration"
            | "ValidatingWebhookConfiguration"
    )
}

/// Apply order for manifest kinds; lower applies first, deletion runs in reverse.
///
/// Identities and credentials must exist before the workloads that use them.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "ServiceAccount" => 1,
        "ClusterRole" | "Role" => 2,
        "ClusterRoleBinding" | "RoleBinding" => 3,
        "ConfigMap" | "Secret" | "PersistentVolumeClaim" => 4,
        "Service" => 5,
        "Deployment" | "StatefulSet" | "DaemonSet" | "Pod" | "Job" => 6,
        "Ingress" => 7,
        _ => 8,
    }
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// # Example
/// ```ignore
/// let ar = build_api_resource("apps/v1", "Deployment");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "default", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use berth_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Irregular plurals for kinds templates commonly emit
const KIND_PLURALS: &[(&str, &str)] = &[
    ("ingress", "ingresses"),
    ("ingressclass", "ingressclasses"),
    ("networkpolicy", "networkpolicies"),
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("runtimeclass", "runtimeclasses"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular types, falling back to simple
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
