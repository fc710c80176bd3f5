//! Mirror configuration.
//!
//! Loaded from a TOML file; every field is optional and falls back to its default.
//!
//! ```toml
//! cache_root = "/home/me/.cache/offline-mirror/mirrors"
//! document_timeout_secs = 10
//! asset_timeout_secs = 10
//! max_concurrent_assets = 6
//! ```
//!
//! `OFFLINE_MIRROR_CACHE_DIR` overrides `cache_root` after the file is read.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fetcher::FetchLimits;

pub const CACHE_DIR_ENV: &str = "OFFLINE_MIRROR_CACHE_DIR";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub cache_root: PathBuf,
    pub user_agent: String,
    pub document_timeout_secs: u64,
    pub asset_timeout_secs: u64,
    pub max_concurrent_assets: usize,
    pub max_document_bytes: u64,
    pub max_asset_bytes: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            document_timeout_secs: 10,
            asset_timeout_secs: 10,
            max_concurrent_assets: 6,
            max_document_bytes: 16 * 1024 * 1024,
            max_asset_bytes: 64 * 1024 * 1024,
        }
    }
}

fn default_cache_root() -> PathBuf {
    ProjectDirs::from("", "", "offline-mirror")
        .map(|dirs| dirs.cache_dir().join("mirrors"))
        .unwrap_or_else(|| PathBuf::from("./mirror-cache"))
}

impl MirrorConfig {
    /// Reads a TOML config file, then applies the environment override.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: MirrorConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.cache_root = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_assets == 0 || self.max_concurrent_assets > MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "max_concurrent_assets must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.max_concurrent_assets
            )));
        }
        if self.document_timeout_secs == 0 || self.asset_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least one second".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("user_agent must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }

    pub fn document_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: self.document_timeout(),
            max_bytes: self.max_document_bytes,
        }
    }

    pub fn asset_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(self.asset_timeout_secs),
            max_bytes: self.max_asset_bytes,
        }
    }
}
