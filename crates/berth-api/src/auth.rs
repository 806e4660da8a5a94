//! Tenant authentication
//!
//! Every API call is made on behalf of exactly one tenant. The tenant is
//! identified by its bearer token, or, when the server sits behind an
//! authenticating proxy and is configured to trust it, by the proxy's
//! remote-user header.

use std::collections::HashMap;

use axum::http::HeaderMap;
use berth_engine::Tenant;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::TenantEntry;
use crate::error::{Error, Result};

/// Header set by a fronting authenticating proxy
pub const REMOTE_USER_HEADER: &str = "X-Remote-User";

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[derive(Default)]
struct Table {
    /// token -> tenant name
    tokens: HashMap<String, String>,
    /// tenant name -> password hash
    hashes: HashMap<String, Option<String>>,
}

/// Maps requests to tenants
pub struct Authenticator {
    table: RwLock<Table>,
    trust_remote_user_header: bool,
}

impl Authenticator {
    /// Authenticator over the configured tenant table
    pub fn new(tenants: &[TenantEntry], trust_remote_user_header: bool) -> Self {
        let mut table = Table::default();
        for entry in tenants {
            table.tokens.insert(entry.token.clone(), entry.name.clone());
            table
                .hashes
                .insert(entry.name.clone(), entry.password_hash.clone());
        }
        Self {
            table: RwLock::new(table),
            trust_remote_user_header,
        }
    }

    /// The tenant a request acts for
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Tenant> {
        let table = self.table.read().await;

        if self.trust_remote_user_header {
            if let Some(user) = headers.get(REMOTE_USER_HEADER).and_then(|v| v.to_str().ok()) {
                debug!(tenant = %user, "Tenant from remote-user header");
                let hash = table.hashes.get(user).cloned().flatten();
                return Ok(tenant(user, hash));
            }
        }

        let token = extract_bearer_token(headers)
            .ok_or_else(|| Error::Unauthorized("Missing Authorization header".into()))?;
        let name = table
            .tokens
            .get(token)
            .ok_or_else(|| Error::Unauthorized("Unknown token".into()))?;
        let hash = table.hashes.get(name).cloned().flatten();
        Ok(tenant(name, hash))
    }

    /// Replace a tenant's password hash for later requests
    pub async fn set_password_hash(&self, tenant: &str, hash: impl Into<String>) {
        let mut table = self.table.write().await;
        table.hashes.insert(tenant.to_string(), Some(hash.into()));
    }
}

fn tenant(name: &str, hash: Option<String>) -> Tenant {
    match hash {
        Some(hash) => Tenant::new(name).with_password_hash(hash),
        None => Tenant::new(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<TenantEntry> {
        vec![
            TenantEntry {
                name: "alice".into(),
                token: "t-alice".into(),
                password_hash: Some("$apr1$a".into()),
            },
            TenantEntry {
                name: "bob".into(),
                token: "t-bob".into(),
                password_hash: None,
            },
        ]
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(*k, v.parse().unwrap());
        }
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&headers(&[("Authorization", "Bearer abc123")])),
            Some("abc123")
        );
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
        assert_eq!(
            extract_bearer_token(&headers(&[("Authorization", "Basic abc123")])),
            None
        );
    }

    // ==========================================================================
    // Story Tests: Who is calling
    // ==========================================================================

    /// Story: a known token resolves to its tenant and password hash
    #[tokio::test]
    async fn story_token_identifies_tenant() {
        let auth = Authenticator::new(&entries(), false);
        let alice = auth
            .authenticate(&headers(&[("Authorization", "Bearer t-alice")]))
            .await
            .unwrap();
        assert_eq!(alice.name, "alice");
        assert_eq!(alice.password_hash.as_deref(), Some("$apr1$a"));

        let bob = auth
            .authenticate(&headers(&[("Authorization", "Bearer t-bob")]))
            .await
            .unwrap();
        assert_eq!(bob, Tenant::new("bob"));
    }

    /// Story: missing and unknown tokens are rejected
    #[tokio::test]
    async fn story_unknown_callers_rejected() {
        let auth = Authenticator::new(&entries(), false);
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()).await,
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            auth.authenticate(&headers(&[("Authorization", "Bearer nope")]))
                .await,
            Err(Error::Unauthorized(_))
        ));
    }

    /// Story: the remote-user header only counts when the proxy is trusted
    #[tokio::test]
    async fn story_remote_user_header_requires_trust() {
        let request = headers(&[(REMOTE_USER_HEADER, "alice")]);

        let untrusting = Authenticator::new(&entries(), false);
        assert!(untrusting.authenticate(&request).await.is_err());

        let trusting = Authenticator::new(&entries(), true);
        let alice = trusting.authenticate(&request).await.unwrap();
        assert_eq!(alice.name, "alice");
        assert_eq!(alice.password_hash.as_deref(), Some("$apr1$a"));
    }

    /// Story: a changed password is used from the next request on
    #[tokio::test]
    async fn story_password_change_is_remembered() {
        let auth = Authenticator::new(&entries(), false);
        auth.set_password_hash("bob", "$apr1$new").await;
        let bob = auth
            .authenticate(&headers(&[("Authorization", "Bearer t-bob")]))
            .await
            .unwrap();
        assert_eq!(bob.password_hash.as_deref(), Some("$apr1$new"));
    }
}
