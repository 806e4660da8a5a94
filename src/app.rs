//! Router assembly from server configuration

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use berth_api::{api_router, AppState, Authenticator, ServerConfig, TlsFiles};
use berth_common::{EngineConfig, Error};
use berth_engine::{ClusterCatalog, ClusterClient, Orchestrator, OwnershipLedger, ResourceKind};
use berth_template::datasets::dataset_catalog;
use berth_template::{DirectoryCatalog, TemplateCatalog};
use berth_webhook::{webhook_router, WebhookState};
use tokio::net::TcpListener;
use tracing::info;

/// The two routers the server exposes
pub struct App {
    /// Tenant API
    pub api: Router,
    /// Admission endpoints
    pub webhook: Router,
    /// Service orchestrator, shared with the API
    pub services: Arc<Orchestrator>,
}

/// Service templates come from `templatesDir` when set, otherwise from
/// `ServiceTemplate` objects in the system namespace.
pub fn service_catalog(
    config: &EngineConfig,
    cluster: Arc<dyn ClusterClient>,
) -> Arc<dyn TemplateCatalog> {
    match &config.templates_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using directory template catalog");
            Arc::new(DirectoryCatalog::new(dir, config.template_defaults))
        }
        None => {
            info!(namespace = %config.system_namespace, "Using cluster template catalog");
            Arc::new(ClusterCatalog::new(
                cluster,
                config.system_namespace.clone(),
                config.template_defaults,
            ))
        }
    }
}

/// Wire orchestrators, authentication and routers
pub fn build(
    config: &ServerConfig,
    cluster: Arc<dyn ClusterClient>,
    ledger: Arc<dyn OwnershipLedger>,
) -> App {
    let engine = Arc::new(config.engine.clone());

    let services = Arc::new(Orchestrator::new(
        ResourceKind::Service,
        engine.clone(),
        service_catalog(&engine, cluster.clone()),
        cluster.clone(),
        ledger.clone(),
    ));
    let datasets = Arc::new(Orchestrator::new(
        ResourceKind::Dataset,
        engine.clone(),
        Arc::new(dataset_catalog(engine.template_defaults)),
        cluster.clone(),
        ledger,
    ));
    let auth = Arc::new(Authenticator::new(
        &config.tenants,
        config.trust_remote_user_header,
    ));

    let api = api_router(AppState {
        services: services.clone(),
        datasets,
        auth,
        config: engine.clone(),
    });
    let webhook = webhook_router(Arc::new(WebhookState::new(cluster, engine)));

    App {
        api,
        webhook,
        services,
    }
}

/// Serve the admission endpoints, over TLS when certificates are configured
pub async fn serve_webhook(
    addr: SocketAddr,
    router: Router,
    tls: Option<&TlsFiles>,
) -> Result<(), Error> {
    match tls {
        Some(files) => {
            let tls_config = RustlsConfig::from_pem_file(&files.cert_file, &files.key_file)
                .await
                .map_err(|e| {
                    Error::internal_with_context("webhook_tls", format!("TLS config error: {}", e))
                })?;
            info!(addr = %addr, "Starting HTTPS webhook server");
            axum_server::bind_rustls(addr, tls_config)
                .serve(router.into_make_service())
                .await
                .map_err(|e| Error::internal_with_context("serve_webhook", e.to_string()))
        }
        None => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| Error::internal_with_context("bind", format!("{addr}: {e}")))?;
            info!(addr = %addr, "Starting plain HTTP webhook server");
            axum::serve(listener, router)
                .await
                .map_err(|e| Error::internal_with_context("serve_webhook", e.to_string()))
        }
    }
}
