//! Shared fixtures for live-cluster tests

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use berth_common::EngineConfig;
use berth_engine::KubeClusterClient;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

/// Client for the current kubeconfig context
pub async fn client() -> Client {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Client::try_default()
        .await
        .expect("a reachable cluster is required for kind tests")
}

/// Cluster seam over the live client
pub fn cluster(client: Client) -> Arc<KubeClusterClient> {
    Arc::new(KubeClusterClient::new(client, Duration::from_secs(30)))
}

/// Unique tenant name so reruns do not collide
pub fn tenant_name(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{prefix}-{:06x}", millis & 0xFFFFFF)
}

/// Engine settings pointing at a throwaway system namespace
pub fn engine_config(system_namespace: &str) -> EngineConfig {
    EngineConfig {
        namespace_prefix: "berth-it-".to_string(),
        system_namespace: system_namespace.to_string(),
        ingress_url: "http://berth.localtest.me".to_string(),
        ..Default::default()
    }
}

/// Create a namespace if it does not exist
pub async fn ensure_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    namespaces
        .patch(name, &PatchParams::apply("berth-test").force(), &Patch::Apply(&ns))
        .await
        .expect("namespace apply should succeed");
}
