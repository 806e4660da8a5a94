//! Stories about the ServiceTemplate custom resource

use std::time::Duration;

use berth_common::config::FlagDefaults;
use berth_common::crd::{ServiceTemplate, ServiceTemplateSpec};
use berth_engine::ClusterCatalog;
use berth_template::TemplateCatalog;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::CustomResourceExt;

use super::helpers::{client, cluster, ensure_namespace, tenant_name};

const TEMPLATE: &str = "kind: Template\nname: Notebook\nvariables:\n- name: NAME\n  default: notebook\n";

fn service_template(name: &str, data: &str, disabled: bool) -> ServiceTemplate {
    ServiceTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: ServiceTemplateSpec {
            data: data.to_string(),
            disabled,
        },
    }
}

/// Story: an operator installs the CRD and publishes templates; disabled
/// entries stay hidden and malformed ones are reported, not fatal.
#[tokio::test]
#[ignore]
async fn story_cluster_catalog_reads_published_templates() {
    let client = client().await;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        "servicetemplates.berth.dev",
        &PatchParams::apply("berth-test").force(),
        &Patch::Apply(&ServiceTemplate::crd()),
    )
    .await
    .expect("CRD apply should succeed");
    // Give the API server a moment to serve the new type
    tokio::time::sleep(Duration::from_secs(2)).await;

    let namespace = tenant_name("berth-catalog");
    ensure_namespace(&client, &namespace).await;

    let templates: Api<ServiceTemplate> = Api::namespaced(client.clone(), &namespace);
    let pp = PostParams::default();
    templates
        .create(&pp, &service_template("notebook", TEMPLATE, false))
        .await
        .expect("create should succeed");
    templates
        .create(&pp, &service_template("retired", TEMPLATE, true))
        .await
        .expect("create should succeed");
    templates
        .create(&pp, &service_template("broken", "kind: Template\n", false))
        .await
        .expect("create should succeed");

    let catalog = ClusterCatalog::new(cluster(client.clone()), namespace.as_str(), FlagDefaults::CURRENT);
    let listing = catalog.list().await.expect("listing should succeed");

    let ids: Vec<&str> = listing.templates.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec!["notebook"]);
    assert_eq!(listing.skipped.len(), 1);
    assert_eq!(listing.skipped[0].id, "broken");
    assert!(catalog.get("retired").await.is_err());

    let namespaces: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(client);
    let _ = namespaces.delete(&namespace, &DeleteParams::default()).await;
}
