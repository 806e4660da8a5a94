//! Storage domains
//!
//! A storage domain is a volume that materialized pods get mounted: the
//! tenant's private directory, the shared directory, or a dataset claim.

use berth_common::config::StorageConfig;
use berth_common::Result;
use serde_json::{json, Value};

/// Where a domain's data comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeSource {
    /// Directory on the node
    HostPath {
        /// Absolute host path
        path: String,
    },
    /// PersistentVolumeClaim in the tenant namespace
    Claim {
        /// Claim name
        claim_name: String,
    },
}

/// A volume plus the place it is mounted in every container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageDomain {
    /// Short name ("private", "shared", or the dataset claim)
    pub name: String,
    /// Volume name inside pod specs
    pub volume_name: String,
    /// Mount path inside containers
    pub mount_dir: String,
    /// Backing source
    pub source: VolumeSource,
}

impl StorageDomain {
    /// Pod `volumes` entry
    pub fn volume(&self) -> Value {
        match &self.source {
            VolumeSource::HostPath { path } => json!({
                "name": self.volume_name,
                "hostPath": {"path": path, "type": "DirectoryOrCreate"}
            }),
            VolumeSource::Claim { claim_name } => json!({
                "name": self.volume_name,
                "persistentVolumeClaim": {"claimName": claim_name}
            }),
        }
    }

    /// Container `volumeMounts` entry
    pub fn mount(&self) -> Value {
        json!({"name": self.volume_name, "mountPath": self.mount_dir})
    }

    /// Host path, for host-path domains
    pub fn host_path(&self) -> Option<&str> {
        match &self.source {
            VolumeSource::HostPath { path } => Some(path),
            VolumeSource::Claim { .. } => None,
        }
    }

    /// Computed variable holding the mount path (`PRIVATE_DIR`)
    pub fn dir_variable(&self) -> String {
        format!("{}_DIR", self.name.to_uppercase())
    }

    /// Computed variable holding the volume name (`PRIVATE_VOLUME`)
    pub fn volume_variable(&self) -> String {
        format!("{}_VOLUME", self.name.to_uppercase())
    }
}

/// The private and shared domains of a tenant
pub fn tenant_domains(storage: &StorageConfig, username: &str) -> Result<Vec<StorageDomain>> {
    let root = storage.host_root()?;
    let mount = storage.mount_dir.trim_end_matches('/');
    Ok(vec![
        StorageDomain {
            name: "private".to_string(),
            volume_name: "berth-private".to_string(),
            mount_dir: format!("{mount}/private"),
            source: VolumeSource::HostPath {
                path: root.join("private").join(username).display().to_string(),
            },
        },
        StorageDomain {
            name: "shared".to_string(),
            volume_name: "berth-shared".to_string(),
            mount_dir: format!("{mount}/shared"),
            source: VolumeSource::HostPath {
                path: root.join("shared").display().to_string(),
            },
        },
    ])
}

/// One domain per dataset claim, mounted under the datasets directory
pub fn dataset_domains(storage: &StorageConfig, claims: &[String]) -> Vec<StorageDomain> {
    let mount = storage.datasets_mount_dir.trim_end_matches('/');
    claims
        .iter()
        .map(|claim| StorageDomain {
            name: claim.clone(),
            volume_name: format!("berth-dataset-{claim}"),
            mount_dir: format!("{mount}/{claim}"),
            source: VolumeSource::Claim {
                claim_name: claim.clone(),
            },
        })
        .collect()
}
