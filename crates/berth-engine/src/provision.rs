//! Tenant namespace and credential provisioning
//!
//! Every tenant moves through a fixed sequence of states. Each step checks
//! what already exists before acting, so provisioning can be re-run at any
//! time and converges:
//!
//! ```text
//! Absent -> NamespaceCreated -> RegistryCredentialPresent -> AuthCredentialPresent -> Ready
//! ```
//!
//! The namespace and workflow identity manifests are kept as versioned
//! template texts and go through the same parser and renderer as catalog
//! templates.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use berth_common::config::{FlagDefaults, RegistryConfig};
use berth_common::retry::{retry_with_backoff, RetryConfig};
use berth_common::yaml::parse_documents;
use berth_common::{
    EngineConfig, Error, Result, AUTH_SECRET_NAME, REGISTRY_SECRET_NAME, TENANT_LABEL,
};
use berth_template::model::is_dns_label;
use berth_template::{render, Template};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterClient;

/// Tenant namespace plus namespace-local admin rights for its default account
pub const TENANT_NAMESPACE_V1: &str = r#"
kind: Template
name: tenant-namespace
description: Tenant namespace with namespace-local admin for the default account
variables:
- name: NAME
  default: tenant
---
apiVersion: v1
kind: Namespace
metadata:
  name: $NAMESPACE
  labels:
    berth.dev/tenant: $NAME
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: berth-admin-binding
  namespace: $NAMESPACE
subjects:
- kind: ServiceAccount
  name: default
  namespace: $NAMESPACE
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: admin
"#;

/// Identity the workflow engine uses to act inside a tenant namespace
pub const WORKFLOW_IDENTITY_V1: &str = r#"
kind: Template
name: tenant-workflow-identity
description: Workflow engine service account bound to the tenant namespace
variables:
- name: NAME
  default: tenant
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: $NAMESPACE
  namespace: $WORKFLOW_NAMESPACE
  labels:
    berth.dev/tenant: $NAME
---
apiVersion: v1
kind: Secret
type: kubernetes.io/service-account-token
metadata:
  name: ${NAMESPACE}-token
  namespace: $WORKFLOW_NAMESPACE
  annotations:
    kubernetes.io/service-account.name: $NAMESPACE
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: berth-workflow-binding
  namespace: $NAMESPACE
subjects:
- kind: ServiceAccount
  name: $NAMESPACE
  namespace: $WORKFLOW_NAMESPACE
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: admin
"#;

/// Provisioning progress of a tenant
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TenantState {
    /// No namespace
    Absent,
    /// Namespace and admin binding exist
    NamespaceCreated,
    /// Registry pull secret exists and is linked, or no registry is configured
    RegistryCredentialPresent,
    /// Basic-auth secret exists, or a gateway handles auth
    AuthCredentialPresent,
    /// Workflow identity exists, or no workflow engine is configured
    Ready,
}

/// A user or team owning one namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant {
    /// Tenant name; also the namespace suffix
    pub name: String,
    /// htpasswd-style hash of the tenant password, if known
    pub password_hash: Option<String>,
}

impl Tenant {
    /// Tenant without a known password
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password_hash: None,
        }
    }

    /// Attach the password hash used for basic auth
    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    fn check(&self) -> Result<()> {
        if is_dns_label(&self.name) {
            Ok(())
        } else {
            Err(Error::bad_field(
                "tenant",
                format!("{:?} is not a valid tenant name", self.name),
            ))
        }
    }
}

/// Ensures tenant namespaces and their credentials exist
pub struct Provisioner {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<EngineConfig>,
    account_wait: RetryConfig,
}

impl Provisioner {
    /// Provisioner waiting up to 30s for the default service account
    pub fn new(cluster: Arc<dyn ClusterClient>, config: Arc<EngineConfig>) -> Self {
        Self {
            cluster,
            config,
            account_wait: RetryConfig::fixed(30, Duration::from_secs(1)),
        }
    }

    /// Override how long to wait for the default service account
    pub fn with_account_wait(mut self, wait: RetryConfig) -> Self {
        self.account_wait = wait;
        self
    }

    /// Current state of a tenant, read from the cluster
    pub async fn observe(&self, tenant: &str) -> Result<TenantState> {
        let ns = self.config.tenant_namespace(tenant);
        if self
            .cluster
            .get("v1", "Namespace", None, &ns)
            .await?
            .is_none()
        {
            return Ok(TenantState::Absent);
        }
        if !self.registry_present(&ns).await? {
            return Ok(TenantState::NamespaceCreated);
        }
        if !self.auth_present(&ns).await? {
            return Ok(TenantState::RegistryCredentialPresent);
        }
        if !self.workflow_identity_present(&ns).await? {
            return Ok(TenantState::AuthCredentialPresent);
        }
        Ok(TenantState::Ready)
    }

    /// Run every provisioning step and return the state reached.
    ///
    /// Without a gateway and without a known password the tenant stops short
    /// of `AuthCredentialPresent`; its ingresses then reject every request
    /// until a password is set.
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name))]
    pub async fn provision(&self, tenant: &Tenant) -> Result<TenantState> {
        tenant.check()?;
        let ns = self.config.tenant_namespace(&tenant.name);

        self.ensure_namespace(&tenant.name, &ns).await?;
        self.ensure_registry_credential(&ns).await?;
        let auth_ready = self.ensure_auth_credential(tenant, &ns).await?;
        self.ensure_workflow_identity(&tenant.name, &ns).await?;

        if auth_ready {
            Ok(TenantState::Ready)
        } else {
            Ok(TenantState::RegistryCredentialPresent)
        }
    }

    /// Replace the basic-auth secret after a password change
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name))]
    pub async fn update_auth_credential(&self, tenant: &Tenant) -> Result<TenantState> {
        tenant.check()?;
        let ns = self.config.tenant_namespace(&tenant.name);
        if self
            .cluster
            .get("v1", "Namespace", None, &ns)
            .await?
            .is_none()
        {
            return Err(Error::not_found("tenant", &tenant.name));
        }
        self.ensure_auth_credential(tenant, &ns).await?;
        self.observe(&tenant.name).await
    }

    /// Remove a tenant's namespace and the objects held for it elsewhere.
    ///
    /// Returns whether the namespace existed.
    #[instrument(skip(self))]
    pub async fn deprovision(&self, tenant: &str) -> Result<bool> {
        let ns = self.config.tenant_namespace(tenant);
        if let Some(workflow_ns) = &self.config.workflow_namespace {
            self.cluster
                .delete("v1", "Secret", Some(workflow_ns), &format!("{ns}-token"))
                .await?;
            self.cluster
                .delete("v1", "ServiceAccount", Some(workflow_ns), &ns)
                .await?;
        }
        let removed = self.cluster.delete("v1", "Namespace", None, &ns).await?;
        info!(namespace = %ns, removed, "Deprovisioned tenant");
        Ok(removed)
    }

    async fn ensure_namespace(&self, tenant: &str, ns: &str) -> Result<()> {
        if self
            .cluster
            .get("v1", "Namespace", None, ns)
            .await?
            .is_some()
        {
            debug!(namespace = %ns, "Namespace already present");
            return Ok(());
        }
        let docs = render_manifest(
            "tenant-namespace",
            TENANT_NAMESPACE_V1,
            &[("NAME", tenant), ("NAMESPACE", ns)],
        )?;
        for doc in &docs {
            self.cluster.apply(doc).await?;
        }
        info!(namespace = %ns, "Created tenant namespace");
        Ok(())
    }

    fn registry_credentials(&self) -> Option<(&RegistryConfig, &str, &str)> {
        let registry = self.config.registry.as_ref()?;
        let username = registry.username.as_deref()?;
        let password = registry.password.as_deref()?;
        Some((registry, username, password))
    }

    async fn registry_present(&self, ns: &str) -> Result<bool> {
        if self.registry_credentials().is_none() {
            return Ok(true);
        }
        if self
            .cluster
            .get("v1", "Secret", Some(ns), REGISTRY_SECRET_NAME)
            .await?
            .is_none()
        {
            return Ok(false);
        }
        let account = self
            .cluster
            .get("v1", "ServiceAccount", Some(ns), "default")
            .await?;
        Ok(account.as_ref().is_some_and(links_registry_secret))
    }

    async fn ensure_registry_credential(&self, ns: &str) -> Result<()> {
        let Some((registry, username, password)) = self.registry_credentials() else {
            return Ok(());
        };

        if self
            .cluster
            .get("v1", "Secret", Some(ns), REGISTRY_SECRET_NAME)
            .await?
            .is_none()
        {
            let secret = registry_secret(ns, registry, username, password)?;
            if self.cluster.create(&secret).await? {
                info!(namespace = %ns, registry = %registry.host(), "Created registry credential");
            }
        }

        // The service account controller creates `default` shortly after the namespace
        let cluster = &self.cluster;
        let account = retry_with_backoff(
            &self.account_wait,
            "wait_default_service_account",
            || async move {
                match cluster.get("v1", "ServiceAccount", Some(ns), "default").await {
                    Ok(Some(account)) => Ok(account),
                    Ok(None) => Err(Error::upstream(
                        format!("get ServiceAccount/default in {ns}"),
                        "default service account not created yet",
                    )),
                    Err(e) => Err(e),
                }
            },
        )
        .await?;

        if !links_registry_secret(&account) {
            self.cluster
                .apply(&json!({
                    "apiVersion": "v1",
                    "kind": "ServiceAccount",
                    "metadata": {"name": "default", "namespace": ns},
                    "imagePullSecrets": [{"name": REGISTRY_SECRET_NAME}]
                }))
                .await?;
            debug!(namespace = %ns, "Linked registry credential to default service account");
        }
        Ok(())
    }

    async fn auth_present(&self, ns: &str) -> Result<bool> {
        if self.config.auth.gateway_url.is_some() {
            return Ok(true);
        }
        Ok(self
            .cluster
            .get("v1", "Secret", Some(ns), AUTH_SECRET_NAME)
            .await?
            .is_some())
    }

    /// Returns whether a usable credential is in place afterwards
    async fn ensure_auth_credential(&self, tenant: &Tenant, ns: &str) -> Result<bool> {
        if self.config.auth.gateway_url.is_some() {
            return Ok(true);
        }
        let existing = self
            .cluster
            .get("v1", "Secret", Some(ns), AUTH_SECRET_NAME)
            .await?;

        let Some(hash) = &tenant.password_hash else {
            if existing.is_none() {
                warn!(
                    tenant = %tenant.name,
                    "No password known for tenant; ingresses will deny all requests"
                );
                return Ok(false);
            }
            return Ok(true);
        };

        let line = format!("{}:{}", tenant.name, hash);
        if existing.as_ref().and_then(auth_line).as_deref() == Some(line.as_str()) {
            return Ok(true);
        }
        self.cluster
            .apply(&json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "type": "Opaque",
                "metadata": {
                    "name": AUTH_SECRET_NAME,
                    "namespace": ns,
                    "labels": {TENANT_LABEL: tenant.name}
                },
                "stringData": {"auth": line}
            }))
            .await?;
        info!(tenant = %tenant.name, replaced = existing.is_some(), "Wrote auth credential");
        Ok(true)
    }

    async fn workflow_identity_present(&self, ns: &str) -> Result<bool> {
        let Some(workflow_ns) = &self.config.workflow_namespace else {
            return Ok(true);
        };
        Ok(self
            .cluster
            .get("v1", "ServiceAccount", Some(workflow_ns), ns)
            .await?
            .is_some())
    }

    async fn ensure_workflow_identity(&self, tenant: &str, ns: &str) -> Result<()> {
        let Some(workflow_ns) = &self.config.workflow_namespace else {
            return Ok(());
        };
        if self.workflow_identity_present(ns).await? {
            return Ok(());
        }
        let docs = render_manifest(
            "tenant-workflow-identity",
            WORKFLOW_IDENTITY_V1,
            &[
                ("NAME", tenant),
                ("NAMESPACE", ns),
                ("WORKFLOW_NAMESPACE", workflow_ns),
            ],
        )?;
        for doc in &docs {
            self.cluster.apply(doc).await?;
        }
        info!(namespace = %ns, workflow_namespace = %workflow_ns, "Created workflow identity");
        Ok(())
    }
}

/// Parse a built-in manifest template and render it with computed values
fn render_manifest(id: &str, text: &str, computed: &[(&str, &str)]) -> Result<Vec<Value>> {
    let template = Template::parse(id, text, FlagDefaults::CURRENT)?;
    let mut values = template.default_values();
    for (name, value) in computed {
        values.insert_computed(name, *value);
    }
    let rendered = render(template.documents(), &values)?;
    parse_documents(&rendered).map_err(|e| Error::internal_with_context(id, e.to_string()))
}

fn links_registry_secret(account: &Value) -> bool {
    account
        .get("imagePullSecrets")
        .and_then(Value::as_array)
        .is_some_and(|secrets| {
            secrets
                .iter()
                .any(|s| s.get("name").and_then(Value::as_str) == Some(REGISTRY_SECRET_NAME))
        })
}

fn registry_secret(
    ns: &str,
    registry: &RegistryConfig,
    username: &str,
    password: &str,
) -> Result<Value> {
    let config = json!({
        "auths": {
            registry.host(): {
                "username": username,
                "password": password,
                "auth": STANDARD.encode(format!("{username}:{password}")),
            }
        }
    });
    let bytes = serde_json::to_vec(&config)
        .map_err(|e| Error::internal_with_context("registry_secret", e.to_string()))?;
    Ok(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "kubernetes.io/dockerconfigjson",
        "metadata": {"name": REGISTRY_SECRET_NAME, "namespace": ns},
        "data": {".dockerconfigjson": STANDARD.encode(bytes)}
    }))
}

/// The htpasswd line stored in an auth secret, from either encoding
fn auth_line(secret: &Value) -> Option<String> {
    if let Some(line) = secret.pointer("/stringData/auth").and_then(Value::as_str) {
        return Some(line.to_string());
    }
    let encoded = secret.pointer("/data/auth").and_then(Value::as_str)?;
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use berth_common::config::AuthConfig;

    fn config() -> EngineConfig {
        EngineConfig {
            registry: Some(RegistryConfig {
                url: "https://registry.example.com/".to_string(),
                username: Some("puller".to_string()),
                password: Some("s3cret".to_string()),
            }),
            workflow_namespace: Some("argo".to_string()),
            ..EngineConfig::default()
        }
    }

    fn provisioner(cluster: &Arc<FakeCluster>, config: EngineConfig) -> Provisioner {
        Provisioner::new(cluster.clone(), Arc::new(config))
            .with_account_wait(RetryConfig::fixed(3, Duration::from_millis(1)))
    }

    fn alice() -> Tenant {
        Tenant::new("alice").with_password_hash("$apr1$x$y")
    }

    #[test]
    fn test_builtin_manifests_parse() {
        let docs = render_manifest(
            "tenant-namespace",
            TENANT_NAMESPACE_V1,
            &[("NAME", "alice"), ("NAMESPACE", "berth-alice")],
        )
        .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metadata"]["name"], "berth-alice");
        assert_eq!(docs[0]["metadata"]["labels"][TENANT_LABEL], "alice");
        assert_eq!(docs[1]["subjects"][0]["namespace"], "berth-alice");

        let docs = render_manifest(
            "tenant-workflow-identity",
            WORKFLOW_IDENTITY_V1,
            &[
                ("NAME", "alice"),
                ("NAMESPACE", "berth-alice"),
                ("WORKFLOW_NAMESPACE", "argo"),
            ],
        )
        .unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1]["metadata"]["name"], "berth-alice-token");
        assert_eq!(docs[2]["metadata"]["namespace"], "berth-alice");
    }

    // ==========================================================================
    // Story Tests: Tenant state machine
    // ==========================================================================

    /// Story: a new tenant walks every step and ends up ready
    #[tokio::test]
    async fn story_fresh_tenant_becomes_ready() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, config());

        assert_eq!(p.observe("alice").await.unwrap(), TenantState::Absent);
        assert_eq!(p.provision(&alice()).await.unwrap(), TenantState::Ready);
        assert_eq!(p.observe("alice").await.unwrap(), TenantState::Ready);

        assert!(cluster.object("Namespace", None, "berth-alice").is_some());
        assert!(cluster
            .object("RoleBinding", Some("berth-alice"), "berth-admin-binding")
            .is_some());

        let pull = cluster
            .object("Secret", Some("berth-alice"), REGISTRY_SECRET_NAME)
            .unwrap();
        assert_eq!(pull["type"], "kubernetes.io/dockerconfigjson");
        let decoded = STANDARD
            .decode(pull["data"][".dockerconfigjson"].as_str().unwrap())
            .unwrap();
        let docker: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(docker["auths"]["registry.example.com"]["username"], "puller");

        let account = cluster
            .object("ServiceAccount", Some("berth-alice"), "default")
            .unwrap();
        assert!(links_registry_secret(&account));

        let auth = cluster
            .object("Secret", Some("berth-alice"), AUTH_SECRET_NAME)
            .unwrap();
        assert_eq!(auth["stringData"]["auth"], "alice:$apr1$x$y");

        assert!(cluster
            .object("ServiceAccount", Some("argo"), "berth-alice")
            .is_some());
    }

    /// Story: provisioning again changes nothing
    #[tokio::test]
    async fn story_provisioning_is_idempotent() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, config());
        p.provision(&alice()).await.unwrap();
        cluster.clear_mutations();

        assert_eq!(p.provision(&alice()).await.unwrap(), TenantState::Ready);
        assert!(cluster.mutations().is_empty());
    }

    /// Story: an external gateway holds credentials, so no auth secret is made
    #[tokio::test]
    async fn story_gateway_skips_auth_secret() {
        let cluster = Arc::new(FakeCluster::new());
        let config = EngineConfig {
            auth: AuthConfig {
                gateway_url: Some("https://auth.example.com".to_string()),
                ..AuthConfig::default()
            },
            ..EngineConfig::default()
        };
        let p = provisioner(&cluster, config);

        assert_eq!(
            p.provision(&Tenant::new("alice")).await.unwrap(),
            TenantState::Ready
        );
        assert!(cluster
            .object("Secret", Some("berth-alice"), AUTH_SECRET_NAME)
            .is_none());
        assert!(cluster
            .object("Secret", Some("berth-alice"), REGISTRY_SECRET_NAME)
            .is_none());
    }

    /// Story: without a password the tenant stops before the auth step
    #[tokio::test]
    async fn story_unknown_password_fails_closed() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, EngineConfig::default());

        assert_eq!(
            p.provision(&Tenant::new("alice")).await.unwrap(),
            TenantState::RegistryCredentialPresent
        );
        assert!(cluster
            .object("Secret", Some("berth-alice"), AUTH_SECRET_NAME)
            .is_none());

        let state = p.update_auth_credential(&alice()).await.unwrap();
        assert_eq!(state, TenantState::Ready);
    }

    /// Story: a password change replaces the stored credential
    #[tokio::test]
    async fn story_password_change_replaces_secret() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, EngineConfig::default());
        p.provision(&alice()).await.unwrap();

        let changed = Tenant::new("alice").with_password_hash("$apr1$new$hash");
        p.update_auth_credential(&changed).await.unwrap();

        let auth = cluster
            .object("Secret", Some("berth-alice"), AUTH_SECRET_NAME)
            .unwrap();
        assert_eq!(auth["stringData"]["auth"], "alice:$apr1$new$hash");
    }

    #[tokio::test]
    async fn test_update_auth_for_unknown_tenant_is_not_found() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, EngineConfig::default());
        match p.update_auth_credential(&alice()).await {
            Err(Error::NotFound { kind, .. }) => assert_eq!(kind, "tenant"),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    /// Story: the registry step gives up once the default account never shows
    #[tokio::test]
    async fn story_missing_default_account_is_hard_failure() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "berth-alice"}
        }));
        let p = provisioner(&cluster, config());

        match p.provision(&alice()).await {
            Err(Error::UpstreamUnavailable { message, .. }) => {
                assert!(message.contains("default service account"))
            }
            other => panic!("Expected UpstreamUnavailable, got {other:?}"),
        }
        assert_eq!(p.observe("alice").await.unwrap(), TenantState::NamespaceCreated);
    }

    /// Story: objects outside the namespace are removed before the namespace
    #[tokio::test]
    async fn story_deprovision_removes_workflow_identity_first() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, config());
        p.provision(&alice()).await.unwrap();
        cluster.clear_mutations();

        assert!(p.deprovision("alice").await.unwrap());

        let deleted: Vec<String> = cluster
            .mutations()
            .into_iter()
            .map(|m| format!("{}/{}", m.kind, m.name))
            .collect();
        assert_eq!(
            deleted,
            vec![
                "Secret/berth-alice-token",
                "ServiceAccount/berth-alice",
                "Namespace/berth-alice"
            ]
        );
        assert_eq!(p.observe("alice").await.unwrap(), TenantState::Absent);
        assert!(cluster.names("Secret", Some("berth-alice")).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_tenant_name_rejected() {
        let cluster = Arc::new(FakeCluster::new());
        let p = provisioner(&cluster, EngineConfig::default());
        assert!(matches!(
            p.provision(&Tenant::new("Alice_Smith")).await,
            Err(Error::BadRequest { .. })
        ));
        assert!(cluster.mutations().is_empty());
    }

    #[test]
    fn test_auth_line_reads_both_encodings() {
        let plain = json!({"stringData": {"auth": "a:b"}});
        assert_eq!(auth_line(&plain).as_deref(), Some("a:b"));
        let encoded = json!({"data": {"auth": STANDARD.encode("a:b")}});
        assert_eq!(auth_line(&encoded).as_deref(), Some("a:b"));
        assert_eq!(auth_line(&json!({})), None);
    }
}
