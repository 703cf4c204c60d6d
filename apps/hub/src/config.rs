//! Hub configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/mobilelink/hub.toml`
//! - Windows: `%APPDATA%\mobilelink\hub.toml`
//!
//! `MOBILELINK_HUB_CONFIG` overrides the path.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MOBILELINK_HUB_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port to listen on (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served to clients on `filerequest`.
    #[serde(default = "default_serving_dir")]
    pub serving_dir: PathBuf,

    /// Seconds between stats log lines.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_port() -> u16 {
    mobilelink_server::ServerConfig::default().port
}

fn default_serving_dir() -> PathBuf {
    PathBuf::from("./files")
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            serving_dir: default_serving_dir(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata).join("mobilelink").join("hub.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("mobilelink").join("hub.toml"))
    }
}
