//! Stories about a tenant's services on a live cluster

use std::collections::BTreeMap;
use std::sync::Arc;

use berth_common::config::FlagDefaults;
use berth_engine::{MemoryLedger, Orchestrator, ResourceKind, Tenant};
use berth_template::MemoryCatalog;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::Api;

use super::helpers::{client, cluster, engine_config, ensure_namespace, tenant_name};

const ECHO: &str = r#"
kind: Template
name: Echo
description: a bare Service
auth: false
mount: false
datasets: false
variables:
- name: NAME
  default: echo
---
apiVersion: v1
kind: Service
metadata:
  name: $NAME
spec:
  selector:
    app: $NAME
  ports:
  - port: 80
"#;

/// Story: a tenant materializes a template twice, sees both instances,
/// deletes one, and is finally removed with everything it owned.
#[tokio::test]
#[ignore]
async fn story_tenant_service_lifecycle() {
    let client = client().await;
    let system_namespace = tenant_name("berth-it-system");
    ensure_namespace(&client, &system_namespace).await;

    let config = Arc::new(engine_config(&system_namespace));
    let orchestrator = Orchestrator::new(
        ResourceKind::Service,
        config.clone(),
        Arc::new(MemoryCatalog::new(FlagDefaults::CURRENT).with_template("echo", ECHO)),
        cluster(client.clone()),
        Arc::new(MemoryLedger::new()),
    );

    let tenant = Tenant::new(tenant_name("alice")).with_password_hash("$apr1$test".to_string());
    let ns = config.tenant_namespace(&tenant.name);

    let first = orchestrator
        .create(&tenant, "echo", &BTreeMap::new())
        .await
        .expect("first create should succeed");
    let second = orchestrator
        .create(&tenant, "echo", &BTreeMap::new())
        .await
        .expect("second create should succeed");
    assert_eq!(first.name, "echo");
    assert_ne!(second.name, first.name);

    let services: Api<Service> = Api::namespaced(client.clone(), &ns);
    assert!(services.get_opt("echo").await.unwrap().is_some());

    let listed = orchestrator.list(&tenant.name).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.deletable));

    orchestrator
        .delete(&tenant.name, &second.name)
        .await
        .expect("delete should succeed");
    assert_eq!(orchestrator.list(&tenant.name).await.unwrap().len(), 1);

    let removed = orchestrator.remove_tenant(&tenant.name).await.unwrap();
    assert_eq!(removed, 1);

    let namespaces: Api<Namespace> = Api::all(client);
    let _ = namespaces
        .delete(&system_namespace, &Default::default())
        .await;
}
