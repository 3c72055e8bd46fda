// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent configuration.
//!
//! Stored as JSON at `~/.tcsync/config.json`. Missing fields take their
//! defaults, so older config files keep working. Environment variables
//! override the file:
//!
//! | Variable             | Field           |
//! |----------------------|-----------------|
//! | `TCSYNC_RESOURCES`   | `resource_root` |
//! | `TCSYNC_CATALOG_URL` | `catalog_url`   |
//! | `TCSYNC_CONCURRENCY` | `concurrency`   |

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deps::DEFAULT_CONTENT_BASE_URL;
use crate::error::{Result, SyncError};
use crate::transport::catalog::DEFAULT_CATALOG_URL;
use crate::transport::http::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_SOCKET_TIMEOUT_SECS};
use crate::types::DEFAULT_OWNER;

/// Number of plan items installed at once.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Pause before fetching a missing prerequisite.
pub const DEFAULT_PREREQUISITE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Where resources are installed.
    #[serde(default = "default_resource_root")]
    pub resource_root: PathBuf,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// Host used to build archive URLs for on-demand prerequisite fetches.
    #[serde(default = "default_content_base_url")]
    pub content_base_url: String,
    #[serde(default = "default_owner")]
    pub default_owner: String,
    /// Owners to sync; empty means every owner.
    #[serde(default)]
    pub owners: Vec<String>,
    /// Languages synced when none are given on the command line.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_prerequisite_delay_ms")]
    pub prerequisite_delay_ms: u64,
}

fn default_resource_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join("translationCore").join("resources"))
        .unwrap_or_else(|| PathBuf::from("resources"))
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_content_base_url() -> String {
    DEFAULT_CONTENT_BASE_URL.to_string()
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_socket_timeout_secs() -> u64 {
    DEFAULT_SOCKET_TIMEOUT_SECS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_prerequisite_delay_ms() -> u64 {
    DEFAULT_PREREQUISITE_DELAY_MS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resource_root: default_resource_root(),
            catalog_url: default_catalog_url(),
            content_base_url: default_content_base_url(),
            default_owner: default_owner(),
            owners: Vec::new(),
            languages: Vec::new(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            socket_timeout_secs: default_socket_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            prerequisite_delay_ms: default_prerequisite_delay_ms(),
        }
    }
}

impl SyncConfig {
    /// `~/.tcsync`, or `.tcsync` when there is no home directory.
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".tcsync"))
            .unwrap_or_else(|| PathBuf::from(".tcsync"))
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| SyncError::json(path, e))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("TCSYNC_RESOURCES").filter(|v| !v.trim().is_empty()) {
            self.resource_root = PathBuf::from(root);
        }
        if let Some(url) = lookup("TCSYNC_CATALOG_URL").filter(|v| !v.trim().is_empty()) {
            self.catalog_url = url;
        }
        if let Some(raw) = lookup("TCSYNC_CONCURRENCY") {
            self.concurrency = raw.trim().parse().map_err(|_| {
                SyncError::Config(format!("TCSYNC_CONCURRENCY must be a positive integer, got {:?}", raw))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SyncError::Config("concurrency must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        if self.resource_root.as_os_str().is_empty() {
            return Err(SyncError::Config("resource_root is empty".into()));
        }
        Ok(())
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save with temp-file + rename.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| SyncError::json(path, e))?;
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| SyncError::io(&temp_path, e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| SyncError::io(&temp_path, e))?;
            file.sync_all().map_err(|e| SyncError::io(&temp_path, e))?;
        }
        fs::rename(&temp_path, path).map_err(|e| SyncError::io(path, e))
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn prerequisite_delay(&self) -> Duration {
        Duration::from_millis(self.prerequisite_delay_ms)
    }
}
