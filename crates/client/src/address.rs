//! Persistence of the last hub address used by the client.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from address persistence.
#[derive(Debug, thiserror::Error)]
pub enum AddressStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_address: Option<String>,
}

/// Stores the last used hub address in a small JSON file.
#[derive(Debug, Clone)]
pub struct AddressStore {
    path: PathBuf,
}

impl AddressStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Opens the store at [`default_address_path`], if a config directory exists.
    pub fn open_default() -> Option<Self> {
        default_address_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the saved address; `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<String>, AddressStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let stored: StoredAddress = serde_json::from_str(&data)?;
        debug!("loaded server address from {:?}", self.path);
        Ok(stored.server_address.filter(|a| !a.is_empty()))
    }

    /// Saves `address`, replacing any previous value.
    pub fn save(&self, address: &str) -> Result<(), AddressStoreError> {
        let stored = StoredAddress {
            server_address: Some(address.to_string()),
        };
        let json = serde_json::to_string_pretty(&stored)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted server address to {:?}", self.path);
        Ok(())
    }
}

/// Returns the default address file path.
pub fn default_address_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("mobilelink").join("client.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
