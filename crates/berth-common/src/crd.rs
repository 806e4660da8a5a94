//! ServiceTemplate CRD for cluster-stored template catalogs
//!
//! A ServiceTemplate carries the raw template text. Parsing and validation
//! happen when the catalog is read, so a malformed entry is reported instead
//! of being rejected at admission.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ServiceTemplate holds one catalog entry.
///
/// Example:
/// ```yaml
/// apiVersion: berth.dev/v1alpha1
/// kind: ServiceTemplate
/// metadata:
///   name: jupyter
///   namespace: berth-system
/// spec:
///   data: |
///     kind: Template
///     name: Jupyter
///     variables:
///     - name: NAME
///       default: jupyter
///     ---
///     apiVersion: v1
///     kind: Service
///     ...
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "berth.dev",
    version = "v1alpha1",
    kind = "ServiceTemplate",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateSpec {
    /// Template document stream
    pub data: String,

    /// Hide the entry from listings without deleting it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}
