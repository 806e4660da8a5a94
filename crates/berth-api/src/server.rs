//! API router and listener

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use berth_common::{EngineConfig, Error};
use berth_engine::Orchestrator;
use tokio::net::TcpListener;
use tracing::info;

use crate::account::{inject, update_credentials};
use crate::auth::Authenticator;
use crate::resources::{resource_router, ResourceState};
use crate::templates::catalog_router;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Service orchestrator
    pub services: Arc<Orchestrator>,
    /// Dataset orchestrator
    pub datasets: Arc<Orchestrator>,
    /// Tenant authentication
    pub auth: Arc<Authenticator>,
    /// Engine configuration
    pub config: Arc<EngineConfig>,
}

/// Create the API router
pub fn api_router(state: AppState) -> Router {
    let services = ResourceState {
        orchestrator: state.services.clone(),
        auth: state.auth.clone(),
    };
    let datasets = ResourceState {
        orchestrator: state.datasets.clone(),
        auth: state.auth.clone(),
    };

    Router::new()
        // Health check
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/credentials", put(update_credentials))
        .route("/api/utils/inject", post(inject))
        .with_state(state)
        .merge(catalog_router("/api/templates", services.clone()))
        .merge(resource_router("/api/services", services))
        .merge(catalog_router("/api/dataset-templates", datasets.clone()))
        .merge(resource_router("/api/datasets", datasets))
}

/// Serve `router` on `addr` until the process stops
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal_with_context("bind", format!("{addr}: {e}")))?;
    info!(addr = %addr, "Starting API server");
    axum::serve(listener, router)
        .await
        .map_err(|e| Error::internal_with_context("serve", e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::TenantEntry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use berth_common::config::FlagDefaults;
    use berth_engine::testing::FakeCluster;
    use berth_engine::{MemoryLedger, OwnershipLedger, ResourceKind};
    use berth_template::datasets::dataset_catalog;
    use berth_template::MemoryCatalog;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const WEB: &str = r#"
kind: Template
name: Web
variables:
- name: NAME
  default: web
---
apiVersion: v1
kind: Service
metadata:
  name: $NAME
spec:
  selector:
    app: $NAME
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: $NAME
spec:
  template:
    metadata:
      labels:
        app: $NAME
    spec:
      containers:
      - name: web
        image: nginx
"#;

    struct Fixture {
        cluster: Arc<FakeCluster>,
        ledger: Arc<MemoryLedger>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let cluster = Arc::new(FakeCluster::new());
        let ledger = Arc::new(MemoryLedger::new());
        let config = Arc::new(EngineConfig::default());
        let services = Orchestrator::new(
            ResourceKind::Service,
            config.clone(),
            Arc::new(MemoryCatalog::new(FlagDefaults::CURRENT).with_template("web", WEB)),
            cluster.clone(),
            ledger.clone(),
        );
        let datasets = Orchestrator::new(
            ResourceKind::Dataset,
            config.clone(),
            Arc::new(dataset_catalog(FlagDefaults::CURRENT)),
            cluster.clone(),
            ledger.clone(),
        );
        let tenants = vec![
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
        ];
        let router = api_router(AppState {
            services: Arc::new(services),
            datasets: Arc::new(datasets),
            auth: Arc::new(Authenticator::new(&tenants, false)),
            config,
        });
        Fixture {
            cluster,
            ledger,
            router,
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    // ==========================================================================
    // Story Tests: Service lifecycle over HTTP
    // ==========================================================================

    /// Story: create, list, delete through the API
    #[tokio::test]
    async fn story_service_lifecycle() {
        let f = fixture();

        let (status, created) = call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-alice"),
            Some(json!({"template": "web", "values": {"NAME": "site"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "site");
        assert_eq!(created["kind"], "service");
        assert_eq!(created["templateId"], "web");

        let (status, listed) = call(&f.router, "GET", "/api/services", Some("t-alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["name"], "site");
        assert_eq!(listed[0]["deletable"], true);

        let (status, _) =
            call(&f.router, "DELETE", "/api/services/site", Some("t-alice"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(f.ledger.list_by_tenant("alice").await.unwrap().is_empty());

        let (_, listed) = call(&f.router, "GET", "/api/services", Some("t-alice"), None).await;
        assert_eq!(listed, json!([]));
    }

    /// Story: requests without a valid token never reach the cluster
    #[tokio::test]
    async fn story_unauthenticated_requests_rejected() {
        let f = fixture();
        let body = json!({"template": "web"});

        let (status, error) =
            call(&f.router, "POST", "/api/services", None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error["kind"], "Unauthorized");

        let (status, _) =
            call(&f.router, "POST", "/api/services", Some("forged"), Some(body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(f.cluster.mutations().is_empty());
    }

    /// Story: engine errors keep their class on the wire
    #[tokio::test]
    async fn story_errors_carry_kind_and_code() {
        let f = fixture();

        let (status, error) = call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-alice"),
            Some(json!({"template": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error["kind"], "NotFound");
        assert_eq!(error["code"], 404);

        let (status, error) = call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-alice"),
            Some(json!({"template": "web", "values": {"UNDECLARED": "x"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["kind"], "BadRequest");

        let (status, error) =
            call(&f.router, "DELETE", "/api/services/nothing", Some("t-alice"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error["kind"], "NotFound");
    }

    /// Story: a malformed body is a 400 in the same error shape
    #[tokio::test]
    async fn story_malformed_body_is_bad_request() {
        let f = fixture();
        let (status, error) = call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-alice"),
            Some(json!({"values": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["kind"], "BadRequest");
    }

    /// Story: one tenant cannot delete another tenant's service
    #[tokio::test]
    async fn story_tenants_are_isolated() {
        let f = fixture();
        call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-alice"),
            Some(json!({"template": "web"})),
        )
        .await;

        let (status, _) = call(&f.router, "DELETE", "/api/services/web", Some("t-bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, listed) = call(&f.router, "GET", "/api/services", Some("t-bob"), None).await;
        assert_eq!(listed, json!([]));
    }

    /// Story: exec returns per-pod results and the joined output
    #[tokio::test]
    async fn story_exec_over_http() {
        let f = fixture();
        call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-alice"),
            Some(json!({"template": "web"})),
        )
        .await;
        f.cluster
            .insert_pod("berth-alice", "web-0", json!({"app": "web"}));

        let (status, result) = call(
            &f.router,
            "POST",
            "/api/services/web/exec",
            Some("t-alice"),
            Some(json!({"command": ["hostname"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["targets"][0]["pod"], "web-0");
        assert_eq!(result["output"], "web-0: hostname\n");
    }

    // ==========================================================================
    // Story Tests: Catalogs and utilities
    // ==========================================================================

    /// Story: both catalogs are browsable, data only on request
    #[tokio::test]
    async fn story_catalog_listing() {
        let f = fixture();

        let (status, list) = call(&f.router, "GET", "/api/templates", Some("t-bob"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["templates"][0]["id"], "web");
        assert!(list["templates"][0].get("data").is_none());

        let (_, list) =
            call(&f.router, "GET", "/api/templates?data=true", Some("t-bob"), None).await;
        assert!(list["templates"][0]["data"].is_string());

        let (status, one) =
            call(&f.router, "GET", "/api/templates/web", Some("t-bob"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(one["name"], "Web");

        let (_, datasets) =
            call(&f.router, "GET", "/api/dataset-templates", Some("t-bob"), None).await;
        assert!(datasets["templates"].as_array().unwrap().len() >= 4);
    }

    /// Story: datasets have no processes to exec into
    #[tokio::test]
    async fn story_dataset_exec_rejected() {
        let f = fixture();
        let (status, _) = call(
            &f.router,
            "POST",
            "/api/datasets/anything/exec",
            Some("t-alice"),
            Some(json!({"command": ["ls"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    /// Story: changing the password rewrites the tenant's auth secret
    #[tokio::test]
    async fn story_credentials_update() {
        let f = fixture();
        call(
            &f.router,
            "POST",
            "/api/services",
            Some("t-bob"),
            Some(json!({"template": "web"})),
        )
        .await;

        let (status, body) = call(
            &f.router,
            "PUT",
            "/api/credentials",
            Some("t-bob"),
            Some(json!({"passwordHash": "$apr1$new"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "Ready");

        let secret = f
            .cluster
            .object("Secret", Some("berth-bob"), "berth-auth")
            .unwrap();
        assert_eq!(secret["stringData"]["auth"], "bob:$apr1$new");
    }

    /// Story: the inject utility mounts the caller's storage into any YAML
    #[tokio::test]
    async fn story_inject_utility() {
        let f = fixture();
        let yaml = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: p\nspec:\n  containers:\n  - name: c\n    image: alpine\n";
        let request = Request::builder()
            .method("POST")
            .uri("/api/utils/inject?datasets=false")
            .header("authorization", "Bearer t-alice")
            .header("content-type", "application/yaml")
            .body(Body::from(yaml))
            .unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains("/var/lib/berth/private/alice"));
        assert!(text.contains("berth-shared"));
        assert!(text.contains(berth_common::NO_DATASETS_LABEL));
        assert!(f.cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_healthz() {
        let f = fixture();
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_values_default_to_empty() {
        let request: crate::resources::CreateRequest =
            serde_json::from_value(json!({"template": "web"})).unwrap();
        assert_eq!(request.values, BTreeMap::new());
    }
}
