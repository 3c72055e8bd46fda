// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Orchestrator types: run reports, progress events and staging guards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{SyncConfig, DEFAULT_CONCURRENCY, DEFAULT_PREREQUISITE_DELAY_MS};
use crate::deps::DEFAULT_CONTENT_BASE_URL;
use crate::error::InstallError;
use crate::types::ResourceDescriptor;

/// Name of the staging directory under the resource root.
pub const STAGING_DIR: &str = ".staging";

/// Prerequisites fetched on demand may not themselves need a fetch.
pub const MAX_DEPENDENCY_DEPTH: u8 = 1;

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Installed descriptors, in plan order.
    pub installed: Vec<ResourceDescriptor>,
    /// Per-item failures, in plan order. A `Prune` failure may belong to
    /// an item that is also listed in `installed`.
    pub errors: Vec<InstallError>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Progress notifications sent while a plan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// An item started.
    Started { resource: String },
    /// A missing prerequisite is being fetched for `resource`.
    FetchingPrerequisite { resource: String, prerequisite: String },
    /// An item is installed at `path`.
    Installed { resource: String, path: PathBuf },
    /// An item failed.
    Failed(InstallError),
}

/// Tunables for an [`Orchestrator`](super::Orchestrator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub concurrency: usize,
    pub content_base_url: String,
    pub prerequisite_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            content_base_url: DEFAULT_CONTENT_BASE_URL.to_string(),
            prerequisite_delay: Duration::from_millis(DEFAULT_PREREQUISITE_DELAY_MS),
        }
    }
}

impl From<&SyncConfig> for OrchestratorSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            content_base_url: config.content_base_url.clone(),
            prerequisite_delay: config.prerequisite_delay(),
        }
    }
}

/// A per-item staging directory, removed when dropped.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Create a fresh, empty staging directory. Leftovers from an earlier
    /// crashed run at the same path are removed first.
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!("Failed to clean staging directory {:?}: {}", self.path, e);
            }
        }
    }
}
