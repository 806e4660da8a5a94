//! Built-in dataset templates
//!
//! Datasets are Datashim `Dataset` objects. They go through the same
//! materialization path as services; the identity marker lands on the
//! `Dataset` document instead of a `Service`.

use berth_common::config::FlagDefaults;

use crate::catalog::MemoryCatalog;

/// Kind carrying the identity marker for datasets
pub const DATASET_KIND: &str = "Dataset";

const S3_LOCAL: &str = r#"
apiVersion: datashim.io/v1alpha1
kind: Dataset
metadata:
  name: $NAME
spec:
  local:
    type: "COS"
    endpoint: "http://${MINIO}.${NAMESPACE}.svc:9000"
    accessKeyID: $ACCESSKEYID
    secretAccessKey: $SECRETACCESSKEY
    bucket: $BUCKET
    region: ""
---
kind: Template
name: S3 (local)
description: Dataset backed by a Minio service in the namespace
auth: false
mount: false
datasets: false
variables:
- name: NAMESPACE
  default: default
- name: NAME
  default: dataset
- name: MINIO
  label: Minio Service Name
  default: ""
  help: In current namespace and listening at port 9000
- name: ACCESSKEYID
  label: Access Key ID
  default: ""
- name: SECRETACCESSKEY
  label: Secret Access Key
  default: ""
- name: BUCKET
  default: ""
"#;

const S3_REMOTE: &str = r#"
apiVersion: datashim.io/v1alpha1
kind: Dataset
metadata:
  name: $NAME
spec:
  local:
    type: "COS"
    endpoint: $ENDPOINT
    accessKeyID: $ACCESSKEYID
    secretAccessKey: $SECRETACCESSKEY
    bucket: $BUCKET
    region: $REGION
---
kind: Template
name: S3 (remote)
description: Dataset backed by a remote S3 endpoint
auth: false
mount: false
datasets: false
variables:
- name: NAME
  default: dataset
- name: ENDPOINT
  default: "https://s3.amazonaws.com"
  help: S3 service endpoint URL
- name: ACCESSKEYID
  label: Access Key ID
  default: ""
- name: SECRETACCESSKEY
  label: Secret Access Key
  default: ""
- name: BUCKET
  default: ""
- name: REGION
  default: ""
  help: Optional
"#;

const S3_SECRET: &str = r#"
apiVersion: datashim.io/v1alpha1
kind: Dataset
metadata:
  name: $NAME
spec:
  local:
    type: "COS"
    endpoint: $ENDPOINT
    secret-name: $SECRETNAME
    bucket: $BUCKET
    region: $REGION
---
kind: Template
name: S3 (secret)
description: Dataset backed by a remote S3 endpoint with credentials in an existing secret
auth: false
mount: false
datasets: false
variables:
- name: NAME
  default: dataset
- name: ENDPOINT
  default: "https://s3.amazonaws.com"
  help: S3 service endpoint URL
- name: SECRETNAME
  label: Secret holding accessKeyID and secretAccessKey
  default: ""
- name: BUCKET
  default: ""
- name: REGION
  default: ""
  help: Optional
"#;

const H3_LOCAL: &str = r#"
apiVersion: datashim.io/v1alpha1
kind: Dataset
metadata:
  name: $NAME
spec:
  local:
    type: "H3"
    storageUri: "redis://${REDIS}.${NAMESPACE}.svc"
    bucket: $BUCKET
---
kind: Template
name: H3 (local)
description: Dataset for H3 over a Redis-compatible service in the namespace
auth: false
mount: false
datasets: false
variables:
- name: NAMESPACE
  default: default
- name: NAME
  default: dataset
- name: REDIS
  label: Redis-compatible Service Name
  default: ""
  help: In current namespace and listening at port 6379
- name: BUCKET
  default: ""
"#;

const H3_REMOTE: &str = r#"
apiVersion: datashim.io/v1alpha1
kind: Dataset
metadata:
  name: $NAME
spec:
  local:
    type: "H3"
    storageUri: $STORAGEURI
    bucket: $BUCKET
---
kind: Template
name: H3 (remote)
description: Dataset for H3 over a remote key-value service
auth: false
mount: false
datasets: false
variables:
- name: NAME
  default: dataset
- name: STORAGEURI
  label: H3 Storage URI
  default: "redis://example.com"
- name: BUCKET
  default: ""
"#;

/// Catalog of the built-in dataset templates
pub fn dataset_catalog(defaults: FlagDefaults) -> MemoryCatalog {
    MemoryCatalog::new(defaults)
        .with_template("s3-local", S3_LOCAL)
        .with_template("s3-remote", S3_REMOTE)
        .with_template("s3-secret", S3_SECRET)
        .with_template("h3-local", H3_LOCAL)
        .with_template("h3-remote", H3_REMOTE)
}
