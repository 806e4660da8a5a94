//! Template catalogs
//!
//! A catalog hands out parsed templates by identifier. Listing never fails
//! because one entry is malformed: bad entries are reported in
//! [`CatalogListing::skipped`] and the rest are returned.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use berth_common::config::FlagDefaults;
use berth_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::model::Template;

/// A catalog entry that could not be loaded
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedTemplate {
    /// Entry identifier
    pub id: String,
    /// Why it was skipped
    pub reason: String,
}

/// Result of listing a catalog
#[derive(Clone, Debug, Default)]
pub struct CatalogListing {
    /// Loaded templates, ordered by identifier
    pub templates: Vec<Template>,
    /// Entries that failed to load
    pub skipped: Vec<SkippedTemplate>,
}

impl CatalogListing {
    /// Record the outcome of loading one entry
    pub fn push(&mut self, id: &str, parsed: Result<Template>) {
        match parsed {
            Ok(template) => self.templates.push(template),
            Err(e) => {
                warn!(template = %id, error = %e, "Skipping template");
                self.skipped.push(SkippedTemplate {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Order templates and skipped entries by identifier
    pub fn sort(&mut self) {
        self.templates.sort_by(|a, b| a.id().cmp(b.id()));
        self.skipped.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

/// Source of templates
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// All templates, with malformed entries reported separately
    async fn list(&self) -> Result<CatalogListing>;

    /// One template; `NotFound` if absent, `InvalidTemplate` if malformed
    async fn get(&self, id: &str) -> Result<Template>;
}

/// Catalog of `*.yaml` / `*.yml` files in a directory; the identifier is the file stem
pub struct DirectoryCatalog {
    dir: PathBuf,
    defaults: FlagDefaults,
}

impl DirectoryCatalog {
    /// Create a catalog over `dir`
    pub fn new(dir: impl Into<PathBuf>, defaults: FlagDefaults) -> Self {
        Self {
            dir: dir.into(),
            defaults,
        }
    }

    fn template_id(path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        if ext != "yaml" && ext != "yml" {
            return None;
        }
        path.file_stem()?.to_str().map(str::to_string)
    }

    async fn load(&self, id: &str, path: &Path) -> Result<Template> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::invalid_template(id, format!("cannot read: {}", e)))?;
        Template::parse(id, &data, self.defaults)
    }
}

#[async_trait]
impl TemplateCatalog for DirectoryCatalog {
    async fn list(&self) -> Result<CatalogListing> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::internal_with_context(
                "list_templates",
                format!("{}: {}", self.dir.display(), e),
            )
        })?;

        let mut listing = CatalogListing::default();
        loop {
            let entry = entries.next_entry().await.map_err(|e| {
                Error::internal_with_context("list_templates", e.to_string())
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            let Some(id) = Self::template_id(&path) else {
                continue;
            };
            let parsed = self.load(&id, &path).await;
            listing.push(&id, parsed);
        }
        listing.sort();
        debug!(
            dir = %self.dir.display(),
            loaded = listing.templates.len(),
            skipped = listing.skipped.len(),
            "Listed template directory"
        );
        Ok(listing)
    }

    async fn get(&self, id: &str) -> Result<Template> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.starts_with('.') {
            return Err(Error::not_found("template", id));
        }
        for ext in ["yaml", "yml"] {
            let path = self.dir.join(format!("{id}.{ext}"));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return self.load(id, &path).await;
            }
        }
        Err(Error::not_found("template", id))
    }
}

/// Catalog held in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    sources: Vec<(String, String)>,
    defaults: FlagDefaults,
}

impl MemoryCatalog {
    /// Empty catalog
    pub fn new(defaults: FlagDefaults) -> Self {
        Self {
            sources: Vec::new(),
            defaults,
        }
    }

    /// Add an entry, replacing any with the same identifier
    pub fn with_template(mut self, id: impl Into<String>, data: impl Into<String>) -> Self {
        let id = id.into();
        self.sources.retain(|(existing, _)| *existing != id);
        self.sources.push((id, data.into()));
        self
    }
}

#[async_trait]
impl TemplateCatalog for MemoryCatalog {
    async fn list(&self) -> Result<CatalogListing> {
        let mut listing = CatalogListing::default();
        for (id, data) in &self.sources {
            listing.push(id, Template::parse(id, data, self.defaults));
        }
        listing.sort();
        Ok(listing)
    }

    async fn get(&self, id: &str) -> Result<Template> {
        self.sources
            .iter()
            .find(|(existing, _)| existing == id)
            .ok_or_else(|| Error::not_found("template", id))
            .and_then(|(id, data)| Template::parse(id, data, self.defaults))
    }
}
