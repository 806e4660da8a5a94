//! Client configuration
//!
//! The CLI needs the API base URL and the caller's bearer token. They are
//! read from the first file found among:
//!
//! 1. the path in `BERTH_CONFIG`
//! 2. `./berth.json`
//! 3. `~/.berth/config.json`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "BERTH_CONFIG";

/// Connection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// API base URL, e.g. `https://berth.example.com`
    pub base_url: String,
    /// Tenant bearer token
    pub token: String,
}

impl ClientConfig {
    /// Load settings from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(path, format!("failed to read: {}", e)))?;
        let config: ClientConfig = serde_json::from_str(&content)
            .map_err(|e| Error::config(path, format!("failed to parse: {}", e)))?;
        Url::parse(&config.base_url)
            .map_err(|e| Error::config(path, format!("invalid baseUrl: {}", e)))?;
        if config.token.is_empty() {
            return Err(Error::config(path, "token must not be empty"));
        }
        Ok(config)
    }

    /// Resolve and load the config file
    pub fn discover() -> Result<Self> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let cwd = std::env::current_dir().ok();
        let home = dirs::home_dir();
        let path = resolve_path(env, cwd.as_deref(), home.as_deref()).ok_or(Error::NoConfig)?;
        tracing::debug!(path = %path.display(), "Using config");
        Self::load(&path)
    }
}

/// Pick the config file to use
///
/// An explicit path is used even when missing so the read error names it.
pub fn resolve_path(
    explicit: Option<PathBuf>,
    cwd: Option<&Path>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    let local = cwd.map(|dir| dir.join("berth.json"));
    let user = home.map(|dir| dir.join(".berth").join("config.json"));
    [local, user].into_iter().flatten().find(|p| p.is_file())
}
