//! Server configuration
//!
//! One YAML file carries the engine settings plus the listeners and the
//! tenant credential table:
//!
//! ```yaml
//! ingressUrl: https://example.com
//! listenAddr: 0.0.0.0:8080
//! webhookListenAddr: 0.0.0.0:8443
//! webhookTls:
//!   certFile: /etc/berth/tls.crt
//!   keyFile: /etc/berth/tls.key
//! tenants:
//!   - name: alice
//!     token: 3f9c...
//!     passwordHash: $apr1$...
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use berth_common::{EngineConfig, Error, Result};
use berth_template::model::is_dns_label;
use serde::{Deserialize, Serialize};

/// A tenant allowed to use the API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantEntry {
    /// Tenant name
    pub name: String,
    /// Bearer token identifying the tenant
    pub token: String,
    /// htpasswd hash for ingress basic auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Certificate and key for the webhook listener
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsFiles {
    /// PEM certificate chain
    pub cert_file: PathBuf,
    /// PEM private key
    pub key_file: PathBuf,
}

/// Full server configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Engine settings
    #[serde(flatten)]
    pub engine: EngineConfig,
    /// API listener
    pub listen_addr: SocketAddr,
    /// Admission webhook listener
    pub webhook_listen_addr: SocketAddr,
    /// TLS for the webhook listener; plain HTTP when absent
    pub webhook_tls: Option<TlsFiles>,
    /// Tenants and their tokens
    pub tenants: Vec<TenantEntry>,
    /// Accept the tenant named by a fronting proxy's remote-user header
    pub trust_remote_user_header: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            webhook_listen_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            webhook_tls: None,
            tenants: Vec::new(),
            trust_remote_user_header: false,
        }
    }
}

impl ServerConfig {
    /// Read and validate a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context("load_config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate configuration text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: ServerConfig = if text.trim().is_empty() {
            ServerConfig::default()
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| Error::bad_request(format!("invalid configuration: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check engine settings and the tenant table
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        let mut names = HashSet::new();
        let mut tokens = HashSet::new();
        for tenant in &self.tenants {
            if !is_dns_label(&tenant.name) {
                return Err(Error::bad_field(
                    "tenants",
                    format!("{:?} is not a valid tenant name", tenant.name),
                ));
            }
            if !names.insert(tenant.name.as_str()) {
                return Err(Error::bad_field(
                    "tenants",
                    format!("tenant {} is listed twice", tenant.name),
                ));
            }
            if tenant.token.is_empty() || !tokens.insert(tenant.token.as_str()) {
                return Err(Error::bad_field(
                    "tenants",
                    format!("tenant {} needs a unique, non-empty token", tenant.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_yaml("").unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.webhook_listen_addr.port(), 8443);
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_engine_and_server_fields_share_one_file() {
        let config = ServerConfig::from_yaml(
            r#"
namespacePrefix: team-
ingressUrl: https://apps.example.com
listenAddr: 127.0.0.1:9000
trustRemoteUserHeader: true
webhookTls:
  certFile: /tls/tls.crt
  keyFile: /tls/tls.key
tenants:
  - name: alice
    token: t-alice
    passwordHash: "$apr1$abc"
  - name: bob
    token: t-bob
"#,
        )
        .unwrap();

        assert_eq!(config.engine.namespace_prefix, "team-");
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(config.trust_remote_user_header);
        assert_eq!(
            config.webhook_tls.unwrap().key_file,
            PathBuf::from("/tls/tls.key")
        );
        assert_eq!(config.tenants.len(), 2);
        assert_eq!(config.tenants[0].password_hash.as_deref(), Some("$apr1$abc"));
        assert_eq!(config.tenants[1].password_hash, None);
    }

    // ==========================================================================
    // Story Tests: Tenant table validation
    // ==========================================================================

    /// Story: a token shared by two tenants would let one act as the other
    #[test]
    fn story_duplicate_tokens_rejected() {
        let err = ServerConfig::from_yaml(
            "tenants:\n- {name: alice, token: same}\n- {name: bob, token: same}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("bob"));
    }

    /// Story: tenant names become namespace suffixes and must be DNS labels
    #[test]
    fn story_invalid_tenant_names_rejected() {
        assert!(ServerConfig::from_yaml("tenants:\n- {name: Alice, token: t}\n").is_err());
        assert!(ServerConfig::from_yaml("tenants:\n- {name: alice, token: ''}\n").is_err());
        assert!(ServerConfig::from_yaml(
            "tenants:\n- {name: alice, token: a}\n- {name: alice, token: b}\n"
        )
        .is_err());
    }
}
