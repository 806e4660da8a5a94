//! Engine configuration
//!
//! Loaded once at startup from a YAML file. Every field has a default so an
//! empty file yields a working (if minimal) configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;

/// Flag values applied when a template omits them.
///
/// The defaults changed over time; older catalogs expect [`FlagDefaults::LEGACY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefaults {
    /// At most one live instance per tenant
    pub singleton: bool,
    /// Gate ingresses with authentication
    pub auth: bool,
    /// Attach tenant storage
    pub mount: bool,
    /// Attach dataset volumes
    pub datasets: bool,
}

impl FlagDefaults {
    /// Defaults for current catalogs
    pub const CURRENT: FlagDefaults = FlagDefaults {
        singleton: false,
        auth: true,
        mount: true,
        datasets: true,
    };

    /// Defaults for catalogs written before dataset volumes were attached by default
    pub const LEGACY: FlagDefaults = FlagDefaults {
        singleton: false,
        auth: true,
        mount: true,
        datasets: false,
    };
}

impl Default for FlagDefaults {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Container registry the tenants pull from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Registry URL, e.g. `https://registry.example.com`
    pub url: String,
    /// Pull username
    #[serde(default)]
    pub username: Option<String>,
    /// Pull password
    #[serde(default)]
    pub password: Option<String>,
}

impl RegistryConfig {
    /// Host part of the registry URL as used in image references
    pub fn host(&self) -> String {
        let trimmed = self
            .url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        trimmed.trim_end_matches('/').to_string()
    }
}

/// Ingress authentication settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Forward-auth gateway; when set, basic auth is not used
    pub gateway_url: Option<String>,
    /// Realm shown by basic auth prompts
    pub realm: String,
    /// Force a TLS redirect on every authenticated ingress
    pub redirect_ssl: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            realm: "berth".to_string(),
            redirect_ssl: false,
        }
    }
}

/// Tenant storage layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Backing location for tenant files; only `file://` is supported
    pub files_url: String,
    /// Where storage domains appear inside containers
    pub mount_dir: String,
    /// Where dataset claims appear inside containers
    pub datasets_mount_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            files_url: "file:///var/lib/berth".to_string(),
            mount_dir: "/berth".to_string(),
            datasets_mount_dir: "/berth/datasets".to_string(),
        }
    }
}

impl StorageConfig {
    /// Host directory backing `files_url`
    pub fn host_root(&self) -> Result<PathBuf, Error> {
        let url = Url::parse(&self.files_url)
            .map_err(|e| Error::bad_field("storage.filesUrl", e.to_string()))?;
        if url.scheme() != "file" {
            return Err(Error::bad_field(
                "storage.filesUrl",
                format!("unsupported scheme {}", url.scheme()),
            ));
        }
        Ok(PathBuf::from(url.path()))
    }
}

/// Kubernetes client timeouts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeTimeouts {
    /// TCP connect timeout
    pub connect_timeout_secs: u64,
    /// Per-response read timeout
    pub read_timeout_secs: u64,
    /// Deadline for a whole cluster call
    pub call_timeout_secs: u64,
}

impl Default for KubeTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
            call_timeout_secs: 60,
        }
    }
}

impl KubeTimeouts {
    /// Connect timeout as a Duration
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a Duration
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Call deadline as a Duration
    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Configuration for the materialization engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Prefix for tenant namespaces (`<prefix><tenant>`)
    pub namespace_prefix: String,
    /// Namespace holding cluster-wide berth objects (prefix reservations, CRD catalog)
    pub system_namespace: String,
    /// Base URL services are exposed under, e.g. `https://example.com`
    pub ingress_url: String,
    /// Pool of URL prefixes; empty means prefixes are generated
    pub service_url_prefixes: Vec<String>,
    /// Registry credentials for tenant namespaces
    pub registry: Option<RegistryConfig>,
    /// Ingress authentication
    pub auth: AuthConfig,
    /// Tenant storage
    pub storage: StorageConfig,
    /// Extra host paths pods may mount
    pub allowed_host_path_dirs: Vec<String>,
    /// Namespace of the workflow engine, if tenants get an identity there
    pub workflow_namespace: Option<String>,
    /// Flag defaults for templates that omit them
    pub template_defaults: FlagDefaults,
    /// Directory catalog location
    pub templates_dir: Option<PathBuf>,
    /// Ownership ledger location
    pub ledger_dir: PathBuf,
    /// Kubernetes client timeouts
    pub kube: KubeTimeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "berth-".to_string(),
            system_namespace: "berth-system".to_string(),
            ingress_url: "http://localhost".to_string(),
            service_url_prefixes: Vec::new(),
            registry: None,
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            allowed_host_path_dirs: Vec::new(),
            workflow_namespace: None,
            template_defaults: FlagDefaults::CURRENT,
            templates_dir: None,
            ledger_dir: PathBuf::from("/var/lib/berth/ledger"),
            kube: KubeTimeouts::default(),
        }
    }
}

impl EngineConfig {
    /// Read and validate a YAML configuration file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context("load_config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate configuration text
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        let config: EngineConfig = if text.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| Error::bad_request(format!("invalid configuration: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace_prefix.is_empty() {
            return Err(Error::bad_field(
                "namespacePrefix",
                "namespace prefix must not be empty",
            ));
        }
        self.ingress_host()?;
        self.storage.host_root()?;
        Ok(())
    }

    /// Tenant namespace name
    pub fn tenant_namespace(&self, tenant: &str) -> String {
        format!("{}{}", self.namespace_prefix, tenant)
    }

    /// Tenant owning a namespace, if it follows the prefix convention
    pub fn tenant_for_namespace<'a>(&self, namespace: &'a str) -> Option<&'a str> {
        namespace
            .strip_prefix(self.namespace_prefix.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Host part of `ingress_url`
    pub fn ingress_host(&self) -> Result<String, Error> {
        let url = Url::parse(&self.ingress_url)
            .map_err(|e| Error::bad_field("ingressUrl", e.to_string()))?;
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| Error::bad_field("ingressUrl", "ingress URL has no host"))
    }

    /// Scheme part of `ingress_url`
    pub fn ingress_scheme(&self) -> String {
        Url::parse(&self.ingress_url)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "http".to_string())
    }

    /// Full URL a prefix is served at
    pub fn service_url(&self, prefix: &str) -> Result<String, Error> {
        Ok(format!(
            "{}://{}.{}",
            self.ingress_scheme(),
            prefix,
            self.ingress_host()?
        ))
    }
}
