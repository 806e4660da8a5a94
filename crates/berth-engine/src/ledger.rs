//! Ownership ledger
//!
//! The ledger is the authority on which materialized resources a tenant may
//! delete. It answers without the cluster and survives restarts (file
//! backend). The in-memory backend is for tests and single-process setups.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use berth_common::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::ResourceKind;

/// Grant of one materialized resource to one tenant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRecord {
    /// Owning tenant
    pub tenant: String,
    /// Resolved resource name
    pub name: String,
    /// Service or dataset
    pub kind: ResourceKind,
    /// Template the resource was materialized from
    pub template_id: String,
    /// When the resource was applied
    pub created_at: DateTime<Utc>,
    /// Rendered manifest stream that was applied
    pub manifest: String,
    /// URL prefix allocated for the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,
    /// Whether `url_prefix` came from the pool and holds a reservation
    #[serde(default)]
    pub prefix_reserved: bool,
}

/// Durable store of ownership records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OwnershipLedger: Send + Sync {
    /// Insert or replace the record for `(record.tenant, record.name)`
    async fn put(&self, record: OwnershipRecord) -> Result<()>;

    /// Record for `(tenant, name)`, if any
    async fn get(&self, tenant: &str, name: &str) -> Result<Option<OwnershipRecord>>;

    /// Remove the record; removing an absent record is not an error
    async fn delete(&self, tenant: &str, name: &str) -> Result<()>;

    /// All records of a tenant, ordered by name
    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<OwnershipRecord>>;

    /// Remove every record of a tenant; returns how many were removed
    async fn delete_tenant(&self, tenant: &str) -> Result<usize>;
}

/// Tenant and resource names become path components, so both must be plain
fn check_component(what: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value.len() <= 253
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        && !value.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(Error::bad_field(what, format!("invalid {what} {value:?}")))
    }
}

/// One JSON file per record at `<dir>/<tenant>/<name>.json`
pub struct FileLedger {
    dir: PathBuf,
}

impl FileLedger {
    /// Open (and create) a ledger directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("open_ledger", &dir, e))?;
        Ok(Self { dir })
    }

    fn tenant_dir(&self, tenant: &str) -> Result<PathBuf> {
        check_component("tenant", tenant)?;
        Ok(self.dir.join(tenant))
    }

    fn record_path(&self, tenant: &str, name: &str) -> Result<PathBuf> {
        check_component("name", name)?;
        Ok(self.tenant_dir(tenant)?.join(format!("{name}.json")))
    }

    async fn read_record(path: &Path) -> Result<Option<OwnershipRecord>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| io_error("read_record", path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read_record", path, e)),
        }
    }
}

fn io_error(context: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::internal_with_context(context, format!("{}: {}", path.display(), e))
}

#[async_trait]
impl OwnershipLedger for FileLedger {
    async fn put(&self, record: OwnershipRecord) -> Result<()> {
        let path = self.record_path(&record.tenant, &record.name)?;
        let tenant_dir = self.tenant_dir(&record.tenant)?;
        tokio::fs::create_dir_all(&tenant_dir)
            .await
            .map_err(|e| io_error("put_record", &tenant_dir, e))?;

        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| Error::internal_with_context("put_record", e.to_string()))?;
        // Write-then-rename so a crash never leaves a torn record
        let tmp = tenant_dir.join(format!(".{}.json.tmp", record.name));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error("put_record", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("put_record", &path, e))?;
        debug!(tenant = %record.tenant, name = %record.name, "Recorded ownership");
        Ok(())
    }

    async fn get(&self, tenant: &str, name: &str) -> Result<Option<OwnershipRecord>> {
        let path = self.record_path(tenant, name)?;
        Self::read_record(&path).await
    }

    async fn delete(&self, tenant: &str, name: &str) -> Result<()> {
        let path = self.record_path(tenant, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete_record", &path, e)),
        }
    }

    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<OwnershipRecord>> {
        let dir = self.tenant_dir(tenant)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list_records", &dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list_records", &dir, e))?
        {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            if let Some(record) = Self::read_record(&path).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn delete_tenant(&self, tenant: &str) -> Result<usize> {
        let count = self.list_by_tenant(tenant).await?.len();
        let dir = self.tenant_dir(tenant)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_error("delete_tenant", &dir, e)),
        }
    }
}

/// Process-local ledger
#[derive(Default)]
pub struct MemoryLedger {
    records: DashMap<(String, String), OwnershipRecord>,
}

impl MemoryLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OwnershipLedger for MemoryLedger {
    async fn put(&self, record: OwnershipRecord) -> Result<()> {
        self.records
            .insert((record.tenant.clone(), record.name.clone()), record);
        Ok(())
    }

    async fn get(&self, tenant: &str, name: &str) -> Result<Option<OwnershipRecord>> {
        Ok(self
            .records
            .get(&(tenant.to_string(), name.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn delete(&self, tenant: &str, name: &str) -> Result<()> {
        self.records.remove(&(tenant.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<OwnershipRecord>> {
        let mut records: Vec<OwnershipRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == tenant)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn delete_tenant(&self, tenant: &str) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|(t, _), _| t != tenant);
        Ok(before - self.records.len())
    }
}
